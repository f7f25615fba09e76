//! Concurrent ingestion: a fixed pool of workers draining one shared queue.
//!
//! Each worker takes an instrument, runs it through fetch -> normalize ->
//! write, reports the terminal outcome over a channel and takes the next one.
//! The orchestrating task is the only writer of the report; outcomes are
//! recorded in completion order.

use super::fetcher::Fetcher;
use super::rate_limiter::RateLimiter;
use super::retry::RetryPolicy;
use super::store::TimeSeriesStore;
use crate::config::IngestConfig;
use crate::error::{FetchError, IngestionError};
use crate::sources::MarketDataSource;
use crate::types::{
    DateRange, Failure, FailureStage, IngestionOutcome, IngestionReport, IngestionStatus,
    InstrumentRef, ReportBuilder,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Reason recorded for instruments that were never dispatched.
pub const CANCELLED: &str = "cancelled";
/// Reason recorded when the provider had nothing for the window.
pub const NO_DATA: &str = "no data";

/// Shared stop flag. Once raised, workers finish their current instrument
/// and take no new ones.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

type WorkQueue = Arc<Mutex<VecDeque<(usize, InstrumentRef)>>>;

/// Everything a worker needs to process one instrument.
#[derive(Clone)]
struct Pipeline {
    fetcher: Fetcher,
    store: Arc<dyn TimeSeriesStore>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
}

impl Pipeline {
    async fn process(&self, instrument: InstrumentRef, window: DateRange) -> IngestionOutcome {
        let mut retry = self.retry.start();

        let batch = loop {
            let attempt = retry.begin_attempt();
            self.rate_limiter.acquire().await;
            debug!(
                "Fetching {} (attempt {}/{})",
                instrument,
                attempt,
                self.retry.max_attempts()
            );

            match self.fetcher.fetch(&instrument, window).await {
                Ok(batch) => break batch,
                Err(FetchError::Upstream(message)) => match retry.on_failure() {
                    Some(delay) => {
                        warn!(
                            "Fetch for {} failed (attempt {}): {}, retrying in {:?}",
                            instrument, attempt, message, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return IngestionOutcome::new(
                            instrument,
                            IngestionStatus::Failed(Failure::new(FailureStage::Fetch, message)),
                            attempt,
                        );
                    }
                },
                Err(FetchError::Schema(err)) => {
                    return IngestionOutcome::new(
                        instrument,
                        IngestionStatus::Failed(Failure::new(
                            FailureStage::Normalize,
                            err.to_string(),
                        )),
                        attempt,
                    );
                }
            }
        };
        let attempts = retry.attempts();

        if batch.is_empty() {
            return IngestionOutcome::new(
                instrument,
                IngestionStatus::Skipped(NO_DATA.to_string()),
                attempts,
            );
        }

        let table = instrument.table();
        let status = match self.store.write(batch, table).await {
            Ok(rows) => IngestionStatus::Inserted(rows),
            Err(err) => IngestionStatus::Failed(Failure::new(FailureStage::Write, err.to_string())),
        };
        IngestionOutcome::new(instrument, status, attempts)
    }
}

/// Bounded worker pool over a universe of instruments.
pub struct IngestionScheduler {
    pipeline: Pipeline,
    stop: StopSignal,
}

impl IngestionScheduler {
    /// Scheduler with its own global rate limiter built from `config`.
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn TimeSeriesStore>,
        config: &IngestConfig,
    ) -> Self {
        Self::with_rate_limiter(
            source,
            store,
            Arc::new(RateLimiter::from_config(&config.rate_limit)),
            config.retry_policy(),
        )
    }

    pub fn with_rate_limiter(
        source: Arc<dyn MarketDataSource>,
        store: Arc<dyn TimeSeriesStore>,
        rate_limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pipeline: Pipeline {
                fetcher: Fetcher::new(source),
                store,
                rate_limiter,
                retry,
            },
            stop: StopSignal::new(),
        }
    }

    /// Use an externally owned stop flag (e.g. one raised on Ctrl-C).
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ingest every instrument of `universe` over `window` with at most
    /// `concurrency` instruments in flight.
    ///
    /// Fails only before dispatch (zero concurrency, unreachable store).
    /// Otherwise the report holds exactly one outcome per universe entry.
    pub async fn run(
        &self,
        universe: Vec<InstrumentRef>,
        window: DateRange,
        concurrency: usize,
    ) -> Result<IngestionReport, IngestionError> {
        if concurrency == 0 {
            return Err(IngestionError::InvalidConcurrency);
        }
        self.pipeline
            .store
            .health_check()
            .await
            .map_err(IngestionError::StoreUnavailable)?;

        let total = universe.len();
        let mut report = ReportBuilder::start(total);
        let workers = concurrency.min(total);
        info!(
            "Ingestion run {} started: {} instruments, {} workers, {} to {}, source {}",
            report.run_id(),
            total,
            workers,
            window.start(),
            window.end(),
            self.pipeline.fetcher.source_name()
        );

        let queue: WorkQueue = Arc::new(Mutex::new(
            universe.iter().cloned().enumerate().collect(),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, IngestionOutcome)>();

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                self.pipeline.clone(),
                queue.clone(),
                window,
                self.stop.clone(),
                tx.clone(),
            )));
        }
        drop(tx);

        let mut completed = vec![false; total];
        while let Some((index, outcome)) = rx.recv().await {
            log_outcome(&outcome);
            completed[index] = true;
            report.record(outcome);
        }

        for handle in handles {
            if let Err(err) = handle.await {
                error!("Ingestion worker exited abnormally: {}", err);
            }
        }

        // Whatever is still queued was never dispatched.
        let undispatched: Vec<(usize, InstrumentRef)> = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if !undispatched.is_empty() {
            info!("Stop requested, {} instruments not dispatched", undispatched.len());
        }
        for (index, instrument) in undispatched {
            completed[index] = true;
            report.record(IngestionOutcome::new(
                instrument,
                IngestionStatus::Skipped(CANCELLED.to_string()),
                0,
            ));
        }

        // A worker that died between dequeue and send leaves a gap.
        for (index, instrument) in universe.into_iter().enumerate() {
            if !completed[index] {
                error!("No outcome received for {}", instrument);
                report.record(IngestionOutcome::new(
                    instrument,
                    IngestionStatus::Failed(Failure::new(
                        FailureStage::Worker,
                        "worker exited without reporting",
                    )),
                    0,
                ));
            }
        }

        let report = report.finish();
        info!("Ingestion run {} finished: {}", report.run_id(), report.summary());
        Ok(report)
    }
}

async fn worker_loop(
    worker_id: usize,
    pipeline: Pipeline,
    queue: WorkQueue,
    window: DateRange,
    stop: StopSignal,
    tx: mpsc::UnboundedSender<(usize, IngestionOutcome)>,
) {
    loop {
        if stop.is_stopped() {
            debug!("Worker {} stopping", worker_id);
            break;
        }

        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let (index, instrument) = match next {
            Some(item) => item,
            None => break,
        };

        // Run each instrument in its own task so a panic is contained to it.
        let job = {
            let pipeline = pipeline.clone();
            let instrument = instrument.clone();
            tokio::spawn(async move { pipeline.process(instrument, window).await })
        };
        let outcome = match job.await {
            Ok(outcome) => outcome,
            Err(err) => IngestionOutcome::new(
                instrument,
                IngestionStatus::Failed(Failure::new(FailureStage::Worker, err.to_string())),
                0,
            ),
        };

        if tx.send((index, outcome)).is_err() {
            break;
        }
    }
}

fn log_outcome(outcome: &IngestionOutcome) {
    match &outcome.status {
        IngestionStatus::Inserted(rows) => info!(
            "{}: inserted {} rows ({} attempts)",
            outcome.instrument, rows, outcome.attempts
        ),
        IngestionStatus::Skipped(reason) => info!("{}: skipped ({})", outcome.instrument, reason),
        IngestionStatus::Failed(failure) => warn!("{}: {}", outcome.instrument, failure),
    }
}
