//! Global upstream throttle shared by every ingestion worker.
//!
//! One GCRA token bucket caps the aggregate call rate regardless of how many
//! workers are active. Its state is a single atomic updated by `governor`.

use crate::config::RateLimitConfig;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type DirectRateLimiter = governor::RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct RateLimiter {
    limiter: DirectRateLimiter,
    granted: AtomicU64,
}

impl RateLimiter {
    /// `per_second` sustained calls with up to `burst` back-to-back.
    pub fn new(per_second: u32, burst: u32) -> Self {
        let per_second = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        Self {
            limiter: governor::RateLimiter::direct(quota),
            granted: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.per_second, config.burst)
    }

    /// Wait until the next upstream call is allowed. Never fails.
    pub async fn acquire(&self) {
        if self.limiter.check().is_err() {
            debug!("Rate limit reached, waiting for next slot");
            self.limiter.until_ready().await;
        }
        self.granted.fetch_add(1, Ordering::Relaxed);
    }

    /// Call slots granted so far.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }
}
