//! Single-instrument fetch: upstream call plus normalization.

use super::normalizer::SchemaNormalizer;
use crate::error::FetchError;
use crate::sources::MarketDataSource;
use crate::types::{DateRange, InstrumentRef, NormalizedBatch};
use std::sync::Arc;
use tracing::debug;

/// Retrieves one instrument's series for a window and normalizes it.
///
/// Does no retrying and no throttling of its own; both belong to the
/// scheduler that drives it.
#[derive(Clone)]
pub struct Fetcher {
    source: Arc<dyn MarketDataSource>,
    normalizer: SchemaNormalizer,
}

impl Fetcher {
    pub fn new(source: Arc<dyn MarketDataSource>) -> Self {
        Self {
            source,
            normalizer: SchemaNormalizer::new(),
        }
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// An empty upstream result is `Ok` with an empty batch. Provider errors
    /// become `FetchError::Upstream`; a malformed record fails the whole
    /// batch with `FetchError::Schema`.
    pub async fn fetch(
        &self,
        instrument: &InstrumentRef,
        window: DateRange,
    ) -> Result<NormalizedBatch, FetchError> {
        let records = self
            .source
            .history(&instrument.symbol, window.start(), window.end())
            .await?;

        if records.is_empty() {
            debug!("{} returned no records for {}", self.source.name(), instrument);
            return Ok(NormalizedBatch::empty(instrument.clone()));
        }

        let batch = self.normalizer.normalize_batch(instrument, &records)?;
        debug!(
            "Fetched {} records ({} bars) for {}",
            records.len(),
            batch.len(),
            instrument
        );
        Ok(batch)
    }
}
