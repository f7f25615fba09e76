use super::InstrumentRef;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Pipeline phase an instrument failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Fetch,
    Normalize,
    Write,
    /// The worker processing the instrument died.
    Worker,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureStage::Fetch => "fetch",
            FailureStage::Normalize => "normalize",
            FailureStage::Write => "write",
            FailureStage::Worker => "worker",
        };
        f.write_str(s)
    }
}

/// Why an instrument ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub stage: FailureStage,
    pub message: String,
}

impl Failure {
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Terminal state of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionStatus {
    /// Rows newly written; `0` when every bar already existed.
    Inserted(usize),
    Skipped(String),
    Failed(Failure),
}

impl IngestionStatus {
    pub fn is_inserted(&self) -> bool {
        matches!(self, IngestionStatus::Inserted(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, IngestionStatus::Skipped(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, IngestionStatus::Failed(_))
    }
}

impl fmt::Display for IngestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestionStatus::Inserted(n) => write!(f, "inserted {} rows", n),
            IngestionStatus::Skipped(reason) => write!(f, "skipped: {}", reason),
            IngestionStatus::Failed(failure) => write!(f, "{}", failure),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionOutcome {
    pub instrument: InstrumentRef,
    pub status: IngestionStatus,
    /// Upstream fetch attempts made (0 if never dispatched).
    pub attempts: u32,
}

impl IngestionOutcome {
    pub fn new(instrument: InstrumentRef, status: IngestionStatus, attempts: u32) -> Self {
        Self {
            instrument,
            status,
            attempts,
        }
    }
}

/// Result of one ingestion run, outcomes in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    outcomes: Vec<IngestionOutcome>,
}

impl IngestionReport {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn outcomes(&self) -> &[IngestionOutcome] {
        &self.outcomes
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    pub fn inserted(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_inserted()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_skipped()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_failed()).count()
    }

    /// Total rows newly written across the run.
    pub fn rows_inserted(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                IngestionStatus::Inserted(n) => n,
                _ => 0,
            })
            .sum()
    }

    /// Outcome for an instrument, if it was part of the run.
    pub fn outcome_for(&self, instrument: &InstrumentRef) -> Option<&IngestionOutcome> {
        self.outcomes.iter().find(|o| &o.instrument == instrument)
    }

    pub fn failures(&self) -> impl Iterator<Item = &IngestionOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failed())
    }

    /// One-line summary for logs and the CLI.
    pub fn summary(&self) -> String {
        format!(
            "{} instruments: {} inserted ({} rows), {} skipped, {} failed in {}ms",
            self.outcomes.len(),
            self.inserted(),
            self.rows_inserted(),
            self.skipped(),
            self.failed(),
            self.duration().num_milliseconds()
        )
    }
}

/// Accumulates outcomes while a run is in flight. Only the orchestrating
/// task owns it; `finish` freezes it into an `IngestionReport`.
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    outcomes: Vec<IngestionOutcome>,
}

impl ReportBuilder {
    pub fn start(expected: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            outcomes: Vec::with_capacity(expected),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn record(&mut self, outcome: IngestionOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn finish(self) -> IngestionReport {
        IngestionReport {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at: Utc::now(),
            outcomes: self.outcomes,
        }
    }
}
