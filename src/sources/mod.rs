pub mod yahoo;

pub use yahoo::YahooFinanceClient;

use crate::error::SourceError;
use crate::types::RawRecord;
use async_trait::async_trait;
use chrono::NaiveDate;

/// Upstream provider of daily OHLCV history.
///
/// Implementations may be slow, rate-limited or return nothing. Records come
/// back in provider shape and in no particular order; normalization happens
/// downstream.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &'static str;

    /// Daily records for `symbol` between `start` and `end`, both inclusive.
    async fn history(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, SourceError>;
}
