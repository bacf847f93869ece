use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use coinsnap_core::{CleanedTable, DatasetSpec, DbConfig, Sink, WriteMode};
use coinsnap_io::sink_csv::CsvSink;
use coinsnap_io::sink_postgres::{TableSink, TableStore};
use coinsnap_io::source_http::{assets_url, date_range_millis, history_url, Fetcher};
use coinsnap_tx::{clean, normalize};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Crypto market-data snapshot ETL
///
/// Fetches one endpoint, flattens and cleans the records, writes a CSV
/// artifact, and replaces the contents of a Postgres table.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Market-data API base URL
    #[arg(long, default_value = "https://api.coincap.io/v2")]
    base_url: String,

    /// CSV artifact path (overwritten each run)
    #[arg(long, default_value = "snapshot.csv")]
    out: PathBuf,

    /// Target database table; defaults to the dataset name
    #[arg(long)]
    table: Option<String>,

    /// Skip the database load and write the CSV artifact only
    #[arg(long)]
    skip_db: bool,

    /// Rows compared value-by-value during post-load verification
    #[arg(long, default_value_t = 5)]
    verify_rows: usize,

    /// Custom dataset policy YAML overriding the built-in preset
    #[arg(long)]
    spec: Option<PathBuf>,

    #[command(subcommand)]
    dataset: Dataset,
}

#[derive(Subcommand, Debug)]
enum Dataset {
    /// Snapshot the asset-listing endpoint
    Assets,

    /// Snapshot one asset's bucketed price history
    History {
        /// Asset identifier, e.g. "bitcoin"
        #[arg(long, default_value = "bitcoin")]
        asset: String,

        /// Bucket granularity code, e.g. "d1" for one-day buckets
        #[arg(long, default_value = "d1")]
        interval: String,

        /// Range start date
        #[arg(long)]
        start: String,

        /// Range end date
        #[arg(long)]
        end: String,

        /// Format the start/end dates are written in
        #[arg(long, default_value = "%Y-%m-%d")]
        date_format: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // Database settings are checked before any network or database activity.
    let db_config = if args.skip_db {
        None
    } else {
        Some(DbConfig::from_env()?)
    };

    let spec: DatasetSpec = match &args.spec {
        Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
        None => match &args.dataset {
            Dataset::Assets => DatasetSpec::asset_listing(),
            Dataset::History { .. } => DatasetSpec::price_history(),
        },
    };

    let url = match &args.dataset {
        Dataset::Assets => assets_url(&args.base_url),
        Dataset::History {
            asset,
            interval,
            start,
            end,
            date_format,
        } => {
            let (start_ms, end_ms) = date_range_millis(start, end, date_format)?;
            history_url(&args.base_url, asset, interval, start_ms, end_ms)
        }
    };

    let table_name = args
        .table
        .clone()
        .unwrap_or_else(|| spec.name.replace('-', "_"));

    info!(dataset = %spec.name, url = %url, "starting ETL run");

    let fetcher = Fetcher::new()?;
    let raw = fetcher.fetch(&url).await?;
    if let Some(ts) = raw.timestamp() {
        info!(timestamp = ts, "response timestamp");
    }

    let table = normalize(&raw, &spec.records_field, &spec.separator)?;
    info!(rows = table.row_count(), "normalized records");

    let cleaned = clean(table, &spec)?;
    info!(
        rows = cleaned.row_count(),
        columns = cleaned.columns().len(),
        "clean pipeline done"
    );

    let csv_sink = CsvSink::new(&args.out);
    csv_sink.write(&cleaned).await?;

    if let Some(config) = db_config {
        let store = TableStore::connect(&config).await?;
        // Release the pool whether or not the load and verification succeed.
        let outcome = load_and_verify(&store, &cleaned, &table_name, args.verify_rows).await;
        store.close().await;
        outcome?;
    }

    info!("ETL run complete");
    Ok(())
}

/// Load the snapshot with replace semantics, then re-read the table and
/// confirm the row count and the first N rows match what was loaded.
async fn load_and_verify(
    store: &TableStore,
    cleaned: &CleanedTable,
    table_name: &str,
    verify_rows: usize,
) -> Result<()> {
    let sink = TableSink::new(store.clone(), table_name.to_string(), WriteMode::Replace);
    sink.write(cleaned).await?;

    let count = store.row_count(table_name).await?;
    anyhow::ensure!(
        count as usize == cleaned.row_count(),
        "row count mismatch after load: table has {count}, snapshot has {}",
        cleaned.row_count()
    );

    let sample = store.fetch_rows(table_name, cleaned, verify_rows).await?;
    for (idx, row) in sample.iter().enumerate() {
        anyhow::ensure!(
            row == &cleaned.rows()[idx],
            "row {idx} mismatch after load"
        );
    }

    info!(
        table = table_name,
        rows = count,
        verified = sample.len(),
        "load verified"
    );
    Ok(())
}
