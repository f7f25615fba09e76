use chrono::NaiveDate;
use deadpool_sqlite::{InteractError, PoolError};
use thiserror::Error;

/// A provider record that cannot be turned into a bar. Aborts the whole
/// batch it belongs to.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("record {index}: missing required field '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("record {index}: invalid value for '{field}': {value}")]
    InvalidField {
        index: usize,
        field: &'static str,
        value: String,
    },
}

/// Failure while retrieving one instrument's series.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Transport or provider failure; retried by the scheduler.
    #[error("upstream error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Errors raised by a `MarketDataSource` implementation.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error: {0}")]
    Api(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("client setup failed: {0}")]
    Client(String),
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        FetchError::Upstream(err.to_string())
    }
}

/// Write-time or read-time store failure. Never retried.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool closed")]
    PoolClosed,

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("batch rejected: {symbol} {date}: {reason}")]
    Rejected {
        symbol: String,
        date: NaiveDate,
        reason: String,
    },

    #[error("store task failed: {0}")]
    Task(String),
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Closed => StoreError::PoolClosed,
            PoolError::Backend(err) => StoreError::Sqlite(err),
            other => StoreError::Pool(other.to_string()),
        }
    }
}

impl From<InteractError> for StoreError {
    fn from(err: InteractError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Fatal problems detected before any instrument is dispatched.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
}

#[derive(Error, Debug)]
pub enum UniverseError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("universe file must contain '{0}' column")]
    MissingColumn(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("window start {start} is after end {end}")]
pub struct InvalidWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}
