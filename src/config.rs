use crate::error::ConfigError;
use crate::services::retry::{Backoff, RetryPolicy};
use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Start of the default ingestion window when `DEFAULT_START_DATE` is unset.
pub const DEFAULT_START_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2020, 1, 1) {
    Some(date) => date,
    None => panic!("invalid default start date"),
};

/// What the store does with bars that violate `low <= open,close <= high`
/// or carry negative volume / corporate-action values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnomalyPolicy {
    /// Store provider-reported anomalies as-is.
    #[default]
    Accept,
    /// Fail the whole batch on the first anomalous bar.
    Reject,
}

impl FromStr for AnomalyPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accept" => Ok(AnomalyPolicy::Accept),
            "reject" => Ok(AnomalyPolicy::Reject),
            _ => Err(ConfigError::InvalidValue {
                key: "ANOMALY_POLICY",
                value: s.to_string(),
            }),
        }
    }
}

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Maximum number of pooled connections.
    pub pool_size: usize,
    /// How long a writer waits on a locked database.
    pub busy_timeout: Duration,
    /// Handling of anomalous bars on write.
    pub anomaly_policy: AnomalyPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("barvault.db"),
            pool_size: 5,
            busy_timeout: Duration::from_millis(5000),
            anomaly_policy: AnomalyPolicy::Accept,
        }
    }
}

/// Global upstream quota.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sustained calls per second across all workers.
    pub per_second: u32,
    /// Calls allowed back-to-back before throttling kicks in.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 2,
            burst: 1,
        }
    }
}

/// Ingestion run configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Worker pool size.
    pub concurrency: usize,
    /// Total fetch attempts per instrument (first try included).
    pub max_attempts: u32,
    /// First retry delay.
    pub retry_base: Duration,
    /// Upper bound on any retry delay.
    pub retry_max: Duration,
    /// Apply +/-50% jitter to retry delays.
    pub retry_jitter: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_attempts: 3,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_millis(8000),
            retry_jitter: true,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl IngestConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Backoff::Exponential {
                base: self.retry_base,
                factor: 2.0,
                max: self.retry_max,
                jitter: self.retry_jitter,
            },
        )
    }
}

/// Market data provider configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Yahoo Finance API base URL.
    pub yahoo_base_url: String,
    /// Per-request timeout.
    pub http_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            http_timeout: Duration::from_secs(30),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub store: StoreConfig,
    pub ingest: IngestConfig,
    pub source: SourceConfig,
    /// CSV file listing the universe (`ticker,type`).
    pub universe_path: PathBuf,
    /// Start of the default ingestion window.
    pub default_start_date: NaiveDate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ingest: IngestConfig::default(),
            source: SourceConfig::default(),
            universe_path: PathBuf::from("cleaned_tickers.csv"),
            default_start_date: DEFAULT_START_DATE,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let anomaly_policy = match env::var("ANOMALY_POLICY") {
            Ok(v) => v.parse()?,
            Err(_) => defaults.store.anomaly_policy,
        };

        let default_start_date = match env::var("DEFAULT_START_DATE") {
            Ok(v) => NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").map_err(|_| {
                ConfigError::InvalidValue {
                    key: "DEFAULT_START_DATE",
                    value: v.clone(),
                }
            })?,
            Err(_) => defaults.default_start_date,
        };

        Ok(Self {
            store: StoreConfig {
                path: env::var("DATABASE_PATH")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.store.path),
                pool_size: env_or("DB_POOL_SIZE", defaults.store.pool_size).max(1),
                busy_timeout: Duration::from_millis(env_or(
                    "DB_BUSY_TIMEOUT_MS",
                    defaults.store.busy_timeout.as_millis() as u64,
                )),
                anomaly_policy,
            },
            ingest: IngestConfig {
                concurrency: env_or("INGEST_CONCURRENCY", defaults.ingest.concurrency),
                max_attempts: env_or("FETCH_MAX_ATTEMPTS", defaults.ingest.max_attempts).max(1),
                retry_base: Duration::from_millis(env_or(
                    "RETRY_BASE_MS",
                    defaults.ingest.retry_base.as_millis() as u64,
                )),
                retry_max: Duration::from_millis(env_or(
                    "RETRY_MAX_MS",
                    defaults.ingest.retry_max.as_millis() as u64,
                )),
                retry_jitter: env_flag("RETRY_JITTER", defaults.ingest.retry_jitter),
                rate_limit: RateLimitConfig {
                    per_second: env_or("RATE_LIMIT_PER_SEC", defaults.ingest.rate_limit.per_second)
                        .max(1),
                    burst: env_or("RATE_LIMIT_BURST", defaults.ingest.rate_limit.burst).max(1),
                },
            },
            source: SourceConfig {
                yahoo_base_url: env::var("YAHOO_BASE_URL")
                    .unwrap_or(defaults.source.yahoo_base_url),
                http_timeout: Duration::from_secs(env_or(
                    "HTTP_TIMEOUT_SECS",
                    defaults.source.http_timeout.as_secs(),
                )),
            },
            universe_path: env::var("UNIVERSE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.universe_path),
            default_start_date,
        })
    }
}

/// Parse `key` from the environment, warning and using `default` when the
/// value is malformed.
fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(key: &str, raw: &str, default: T) -> T {
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("Ignoring invalid {}={:?}, using {}", key, raw, default);
        default
    })
}

fn env_flag(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}
