pub mod fetcher;
pub mod normalizer;
pub mod pool;
pub mod rate_limiter;
pub mod retry;
pub mod scheduler;
pub mod sqlite_store;
pub mod store;

pub use fetcher::Fetcher;
pub use normalizer::SchemaNormalizer;
pub use pool::ConnectionPool;
pub use rate_limiter::RateLimiter;
pub use retry::{Backoff, RetryPolicy, RetryState};
pub use scheduler::{IngestionScheduler, StopSignal};
pub use sqlite_store::SqliteStore;
pub use store::TimeSeriesStore;
