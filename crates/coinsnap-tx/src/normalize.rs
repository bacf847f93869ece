use coinsnap_core::{json_kind, EtlError, RawResponse, Table, Value};
use serde_json::Value as Json;
use tracing::debug;

/// Flatten the named record sequence of a response into a [`Table`].
///
/// Nested objects are flattened by joining parent and child key names with
/// `separator` (e.g. `info.url`). Row order matches the original record
/// order; column order is the first-seen order across records, and fields a
/// record lacks become nulls under the union schema.
pub fn normalize(
    raw: &RawResponse,
    records_field: &str,
    separator: &str,
) -> Result<Table, EtlError> {
    let records = raw.records(records_field)?;

    let mut columns: Vec<String> = Vec::new();
    let mut flat_records: Vec<Vec<(String, Value)>> = Vec::with_capacity(records.len());

    for (idx, record) in records.iter().enumerate() {
        let obj = record.as_object().ok_or_else(|| {
            EtlError::Schema(format!(
                "record {} is {}, expected an object",
                idx,
                json_kind(record)
            ))
        })?;

        let mut flat = Vec::with_capacity(obj.len());
        flatten_into("", obj, separator, &mut flat);
        for (name, _) in &flat {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.clone());
            }
        }
        flat_records.push(flat);
    }

    let rows: Vec<Vec<Value>> = flat_records
        .into_iter()
        .map(|flat| {
            columns
                .iter()
                .map(|col| {
                    flat.iter()
                        .find(|(name, _)| name == col)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null)
                })
                .collect()
        })
        .collect();

    debug!(
        rows = rows.len(),
        columns = columns.len(),
        "normalized record sequence"
    );
    Ok(Table::new(columns, rows))
}

fn flatten_into(
    prefix: &str,
    obj: &serde_json::Map<String, Json>,
    separator: &str,
    out: &mut Vec<(String, Value)>,
) {
    for (key, value) in obj {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}{separator}{key}")
        };
        match value {
            Json::Object(nested) => flatten_into(&name, nested, separator, out),
            other => out.push((name, scalar(other))),
        }
    }
}

/// Map a JSON leaf to a cell. Booleans and arrays are rendered as text;
/// the table model carries only the shapes the cleaner can act on.
fn scalar(value: &Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Str(b.to_string()),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or_else(|| Value::Str(n.to_string())),
        Json::String(s) => Value::Str(s.clone()),
        other => Value::Str(other.to_string()),
    }
}
