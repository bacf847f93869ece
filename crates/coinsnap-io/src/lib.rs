//! # Coinsnap I/O - Source and Sink Implementations
//!
//! The edges of an ETL run:
//!
//! - **HTTP source**: one-shot GET against the market-data API, plus the
//!   epoch-millis date-range helpers for the history endpoint
//! - **CSV sink**: snapshot artifact on disk, overwritten per run
//! - **Table store**: Postgres load with replace/append/upsert write modes
//!   and read-back helpers for post-load verification

/// One-shot HTTP fetcher and date-range helpers
pub mod source_http;

/// CSV artifact sink
pub mod sink_csv;

/// Postgres table store sink
pub mod sink_postgres;
