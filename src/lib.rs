//! Barvault - daily OHLCV ingestion for stocks, ETFs and crypto pairs.
//!
//! Fetches per-instrument history from a rate-limited provider, normalizes it
//! per asset class and writes it idempotently into one SQLite table per class.

pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;
pub mod universe;

pub use config::{AnomalyPolicy, Config, IngestConfig, RateLimitConfig, SourceConfig, StoreConfig};
pub use error::{
    ConfigError, FetchError, IngestionError, SchemaError, SourceError, StoreError, UniverseError,
};
pub use services::{IngestionScheduler, SqliteStore, StopSignal, TimeSeriesStore};
pub use sources::{MarketDataSource, YahooFinanceClient};
pub use types::{
    AssetClass, Bar, DateRange, IngestionOutcome, IngestionReport, IngestionStatus,
    InstrumentRef, NormalizedBatch, RawRecord, TableId,
};

use std::sync::Arc;

/// Ingest `universe` over `window` with at most `concurrency` instruments in
/// flight.
///
/// Returns an error only when the run cannot start: `concurrency` is zero or
/// the store fails its health check. Otherwise every instrument gets exactly
/// one outcome in the report, whatever happened to the others. Raising `stop`
/// lets in-flight instruments finish and reports the rest as skipped.
pub async fn run_ingestion(
    source: Arc<dyn MarketDataSource>,
    store: Arc<dyn TimeSeriesStore>,
    config: &IngestConfig,
    universe: Vec<InstrumentRef>,
    window: DateRange,
    concurrency: usize,
    stop: StopSignal,
) -> Result<IngestionReport, IngestionError> {
    IngestionScheduler::new(source, store, config)
        .with_stop_signal(stop)
        .run(universe, window, concurrency)
        .await
}
