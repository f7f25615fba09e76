use crate::error::StoreError;
use crate::types::{NormalizedBatch, TableId};
use async_trait::async_trait;

/// Durable home of normalized bars, one table per asset class.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Cheap reachability check, run once before any work is dispatched.
    async fn health_check(&self) -> Result<(), StoreError>;

    /// Insert every bar of `batch` whose `(ticker, date)` is not already in
    /// `table` and return how many rows were added. Existing rows are never
    /// touched, so writing the same batch twice adds nothing the second time.
    /// A failure leaves the table exactly as it was.
    async fn write(&self, batch: NormalizedBatch, table: TableId) -> Result<usize, StoreError>;
}
