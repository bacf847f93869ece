use std::path::PathBuf;

use async_trait::async_trait;
use coinsnap_core::{CleanedTable, EtlError, Sink};
use tracing::info;

/// CSV artifact sink: one header row, then one row per record, columns in
/// schema order. An existing file at the path is overwritten
/// unconditionally.
pub struct CsvSink {
    path: PathBuf,
}

impl CsvSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write(&self, table: &CleanedTable) -> Result<(), EtlError> {
        let mut writer = csv::Writer::from_path(&self.path).map_err(csv_error)?;

        writer.write_record(table.columns()).map_err(csv_error)?;
        for row in table.rows() {
            writer
                .write_record(row.iter().map(|cell| cell.render()))
                .map_err(csv_error)?;
        }
        writer.flush()?;

        info!(
            path = %self.path.display(),
            rows = table.row_count(),
            "csv artifact written"
        );
        Ok(())
    }
}

fn csv_error(err: csv::Error) -> EtlError {
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => EtlError::Io(io),
        _ => EtlError::Csv(message),
    }
}
