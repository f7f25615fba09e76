//! Bounded retry with exponential backoff and jitter.
//!
//! A `RetryPolicy` is shared configuration; each fetch drives its own
//! `RetryState` (attempt counter + next delay) so the total number of
//! upstream calls per instrument is fixed by `max_attempts`.

use rand::Rng;
use std::time::Duration;

/// Delay strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay: Duration },
    /// `base * factor^retry`, capped at `max`, optionally with +/-50% jitter.
    Exponential {
        base: Duration,
        factor: f64,
        max: Duration,
        jitter: bool,
    },
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(500),
            factor: 2.0,
            max: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl Backoff {
    /// Delay before retry number `retry` (0-based).
    pub fn delay(self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(retry.min(i32::MAX as u32) as i32);
                let seconds = (base.as_secs_f64() * scale).min(max.as_secs_f64());
                let delay = Duration::from_secs_f64(seconds);

                if !jitter {
                    return delay;
                }

                let half = delay.as_millis() as u64 / 2;
                let offset = rand::thread_rng().gen_range(0..=half * 2);
                Duration::from_millis((delay.as_millis() as u64 + offset).saturating_sub(half))
            }
        }
    }
}

/// How many times a fetch may be attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Backoff::default())
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; values below 1 are raised to 1.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, Backoff::Fixed {
            delay: Duration::ZERO,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Fresh per-fetch state.
    pub fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempts: 0,
        }
    }
}

/// Attempt counter for one fetch.
#[derive(Debug, Clone, Copy)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    /// Mark the start of an attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Called after a failed attempt. Returns the delay before the next one,
    /// or `None` once the attempt budget is spent.
    pub fn on_failure(&self) -> Option<Duration> {
        if self.attempts >= self.policy.max_attempts {
            return None;
        }
        Some(self.policy.backoff.delay(self.attempts.saturating_sub(1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_millis(100),
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(7), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_exponential_backoff_jitter_within_half() {
        let backoff = Backoff::Exponential {
            base: Duration::from_millis(100),
            factor: 2.0,
            max: Duration::from_secs(1),
            jitter: true,
        };

        for _ in 0..20 {
            for retry in 0..5 {
                let expected = (100.0 * 2_f64.powi(retry as i32)).min(1000.0);
                let delay_ms = backoff.delay(retry).as_millis() as f64;
                assert!(delay_ms >= expected * 0.49, "retry={} delay={}", retry, delay_ms);
                assert!(delay_ms <= expected * 1.51, "retry={} delay={}", retry, delay_ms);
            }
        }
    }

    #[test]
    fn test_retry_state_bounds_attempts() {
        let policy = RetryPolicy::new(
            3,
            Backoff::Fixed {
                delay: Duration::from_millis(10),
            },
        );
        let mut state = policy.start();

        assert_eq!(state.begin_attempt(), 1);
        assert_eq!(state.on_failure(), Some(Duration::from_millis(10)));
        assert_eq!(state.begin_attempt(), 2);
        assert_eq!(state.on_failure(), Some(Duration::from_millis(10)));
        assert_eq!(state.begin_attempt(), 3);
        assert_eq!(state.on_failure(), None);
        assert_eq!(state.attempts(), 3);
    }

    #[test]
    fn test_retry_state_uses_backoff_progression() {
        let policy = RetryPolicy::new(
            4,
            Backoff::Exponential {
                base: Duration::from_millis(50),
                factor: 2.0,
                max: Duration::from_secs(1),
                jitter: false,
            },
        );
        let mut state = policy.start();

        state.begin_attempt();
        assert_eq!(state.on_failure(), Some(Duration::from_millis(50)));
        state.begin_attempt();
        assert_eq!(state.on_failure(), Some(Duration::from_millis(100)));
        state.begin_attempt();
        assert_eq!(state.on_failure(), Some(Duration::from_millis(200)));
        state.begin_attempt();
        assert_eq!(state.on_failure(), None);
    }

    #[test]
    fn test_no_retry_and_min_attempts() {
        let mut state = RetryPolicy::no_retry().start();
        state.begin_attempt();
        assert_eq!(state.on_failure(), None);

        assert_eq!(RetryPolicy::new(0, Backoff::default()).max_attempts(), 1);
    }
}
