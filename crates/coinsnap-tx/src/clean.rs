use chrono::{DateTime, NaiveDate};
use coinsnap_core::{
    round_half_even, CleanedTable, ColumnType, DatasetSpec, EtlError, Table, Value,
};
use tracing::debug;

/// Run the declared cleaning policy over a normalized table.
///
/// Steps run in a fixed order: type coercion, date reduction, column
/// pruning, null substitution, rounding. Each step returns a new table
/// state; the first failure aborts the whole operation with the failing
/// stage named once. Re-running `clean` over its own output is a no-op.
pub fn clean(table: Table, spec: &DatasetSpec) -> Result<CleanedTable, EtlError> {
    let table = coerce(table, spec).map_err(|e| stage("coerce", e))?;
    let table = reduce_dates(table, spec).map_err(|e| stage("dates", e))?;
    let table = drop_columns(table, spec);
    let table = fill_nulls(table, spec);
    let table = round_columns(table, spec).map_err(|e| stage("round", e))?;

    let types = resolve_types(&table, spec);
    let (columns, rows) = table.into_parts();
    debug!(
        dataset = %spec.name,
        rows = rows.len(),
        columns = columns.len(),
        "clean pipeline finished"
    );
    Ok(CleanedTable::new(columns, types, rows))
}

fn stage(name: &'static str, source: EtlError) -> EtlError {
    EtlError::Stage {
        stage: name,
        source: Box::new(source),
    }
}

/// Cast every cell of every declared column to its target type. Nulls pass
/// through; substitution happens later in the pipeline.
fn coerce(table: Table, spec: &DatasetSpec) -> Result<Table, EtlError> {
    let (columns, rows) = table.into_parts();
    let targets: Vec<Option<ColumnType>> = columns.iter().map(|c| spec.column_type(c)).collect();

    let mut out = Vec::with_capacity(rows.len());
    for (row_idx, row) in rows.into_iter().enumerate() {
        let mut coerced = Vec::with_capacity(row.len());
        for (col_idx, cell) in row.into_iter().enumerate() {
            let cell = match targets[col_idx] {
                Some(target) => {
                    coerce_cell(cell, target).map_err(|value| EtlError::Coercion {
                        column: columns[col_idx].clone(),
                        row: row_idx,
                        value,
                        target,
                    })?
                }
                None => cell,
            };
            coerced.push(cell);
        }
        out.push(coerced);
    }
    Ok(Table::new(columns, out))
}

fn coerce_cell(cell: Value, target: ColumnType) -> Result<Value, String> {
    match (target, cell) {
        (_, Value::Null) => Ok(Value::Null),
        (ColumnType::Integer, Value::Int(v)) => Ok(Value::Int(v)),
        (ColumnType::Integer, Value::Float(f)) if f.fract() == 0.0 => Ok(Value::Int(f as i64)),
        (ColumnType::Integer, Value::Str(s)) => {
            s.trim().parse::<i64>().map(Value::Int).map_err(|_| s)
        }
        (ColumnType::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (ColumnType::Float, Value::Int(v)) => Ok(Value::Float(v as f64)),
        (ColumnType::Float, Value::Str(s)) => {
            s.trim().parse::<f64>().map(Value::Float).map_err(|_| s)
        }
        (ColumnType::Text, Value::Str(s)) => Ok(Value::Str(s)),
        (ColumnType::Text, other) => Ok(Value::Str(other.render())),
        (ColumnType::Date, Value::Date(d)) => Ok(Value::Date(d)),
        (ColumnType::Date, Value::Str(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|_| s),
        (_, other) => Err(other.render()),
    }
}

/// Parse the designated timestamp column as ISO-8601 and keep only the
/// calendar date. Already-reduced cells pass through.
fn reduce_dates(table: Table, spec: &DatasetSpec) -> Result<Table, EtlError> {
    let Some(column) = spec.date_column.as_deref() else {
        return Ok(table);
    };
    let Some(idx) = table.column_index(column) else {
        return Err(EtlError::Schema(format!(
            "designated date column {:?} is not in the table",
            column
        )));
    };

    let (columns, mut rows) = table.into_parts();
    for (row_idx, row) in rows.iter_mut().enumerate() {
        let cell = &mut row[idx];
        *cell = match std::mem::replace(cell, Value::Null) {
            Value::Null => Value::Null,
            Value::Date(d) => Value::Date(d),
            Value::Str(s) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(ts) => Value::Date(ts.date_naive()),
                Err(_) => {
                    return Err(EtlError::DateParse {
                        column: column.to_string(),
                        row: row_idx,
                        value: s,
                    })
                }
            },
            other => {
                return Err(EtlError::DateParse {
                    column: column.to_string(),
                    row: row_idx,
                    value: other.render(),
                })
            }
        };
    }
    Ok(Table::new(columns, rows))
}

/// Remove the named columns. A name the table does not carry is a no-op.
fn drop_columns(table: Table, spec: &DatasetSpec) -> Table {
    if spec.drop.is_empty() {
        return table;
    }
    let (columns, rows) = table.into_parts();
    let keep: Vec<bool> = columns.iter().map(|c| !spec.drop.contains(c)).collect();

    let columns = columns
        .into_iter()
        .zip(&keep)
        .filter_map(|(c, keep)| keep.then_some(c))
        .collect();
    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(&keep)
                .filter_map(|(cell, keep)| keep.then_some(cell))
                .collect()
        })
        .collect();
    Table::new(columns, rows)
}

/// Apply the declarative `{column -> fallback}` table. Afterwards those
/// columns contain no nulls.
fn fill_nulls(table: Table, spec: &DatasetSpec) -> Table {
    if spec.fill.is_empty() {
        return table;
    }
    let (columns, mut rows) = table.into_parts();
    for fill in &spec.fill {
        let Some(idx) = columns.iter().position(|c| *c == fill.column) else {
            continue;
        };
        let fallback = fill.value.to_cell(spec.column_type(&fill.column));
        for row in rows.iter_mut() {
            if row[idx].is_null() {
                row[idx] = fallback.clone();
            }
        }
    }
    Table::new(columns, rows)
}

/// Round every nominated column to two decimal places, half-to-even. A
/// non-numeric cell here means coercion was skipped for that column, which
/// is a coercion failure, not a rounding one.
fn round_columns(table: Table, spec: &DatasetSpec) -> Result<Table, EtlError> {
    if spec.round.is_empty() {
        return Ok(table);
    }
    let (columns, mut rows) = table.into_parts();
    for column in &spec.round {
        let Some(idx) = columns.iter().position(|c| c == column) else {
            continue;
        };
        for (row_idx, row) in rows.iter_mut().enumerate() {
            let cell = &mut row[idx];
            match cell {
                Value::Float(f) => *f = round_half_even(*f, 2),
                Value::Int(_) | Value::Null => {}
                other => {
                    return Err(EtlError::Coercion {
                        column: column.clone(),
                        row: row_idx,
                        value: other.render(),
                        target: ColumnType::Float,
                    })
                }
            }
        }
    }
    Ok(Table::new(columns, rows))
}

/// Resolve the semantic type of every surviving column: declared types win,
/// the reduced date column is a date, everything else keeps the scalar
/// shape the normalizer produced.
fn resolve_types(table: &Table, spec: &DatasetSpec) -> Vec<ColumnType> {
    table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if let Some(declared) = spec.column_type(name) {
                return declared;
            }
            if spec.date_column.as_deref() == Some(name.as_str()) {
                return ColumnType::Date;
            }
            let mut kinds = (false, false, false, false); // int, float, date, str
            for row in table.rows() {
                match &row[idx] {
                    Value::Int(_) => kinds.0 = true,
                    Value::Float(_) => kinds.1 = true,
                    Value::Date(_) => kinds.2 = true,
                    Value::Str(_) => kinds.3 = true,
                    Value::Null => {}
                }
            }
            match kinds {
                (_, _, _, true) => ColumnType::Text,
                (_, _, true, _) => ColumnType::Date,
                (_, true, false, false) => ColumnType::Float,
                (true, false, false, false) => ColumnType::Integer,
                _ => ColumnType::Text,
            }
        })
        .collect()
}
