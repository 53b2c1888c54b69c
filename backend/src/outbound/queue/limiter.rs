//! Token-bucket limiter capping dispatch throughput across all workers.
//!
//! One bucket is shared by every worker loop, so total dispatch rate tracks
//! the upstream carrier limit regardless of per-kind concurrency.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;

/// Limiter settings; the default matches the carrier's 100 messages/second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Tokens granted per interval.
    pub max: u32,
    /// Refill interval.
    pub interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max: 100,
            interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    refilled_at: DateTime<Utc>,
}

/// Shared token bucket.
pub struct TokenBucket {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.utc();
        Self {
            config,
            clock,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.max.max(1)),
                refilled_at: now,
            }),
        }
    }

    fn tokens_per_second(&self) -> f64 {
        let interval = self.config.interval.as_secs_f64().max(f64::EPSILON);
        f64::from(self.config.max.max(1)) / interval
    }

    /// Take one token, or report how long until one becomes available.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let now = self.clock.utc();
        let rate = self.tokens_per_second();
        let capacity = f64::from(self.config.max.max(1));

        let mut state = match self.state.lock() {
            Ok(state) => state,
            // A poisoned bucket fails open: a stuck limiter must not stall
            // the entire delivery pipeline.
            Err(_) => return Ok(()),
        };

        let elapsed = (now - state.refilled_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        state.tokens = (state.tokens + elapsed * rate).min(capacity);
        state.refilled_at = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(deficit / rate))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    use crate::test_support::MutableClock;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).single().expect("valid instant")
    }

    fn bucket(max: u32) -> (Arc<MutableClock>, TokenBucket) {
        let clock = Arc::new(MutableClock::new(start()));
        let bucket = TokenBucket::new(
            RateLimiterConfig {
                max,
                interval: Duration::from_secs(1),
            },
            clock.clone(),
        );
        (clock, bucket)
    }

    #[rstest]
    fn grants_up_to_capacity_within_one_interval() {
        let (_clock, bucket) = bucket(3);

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[rstest]
    fn refills_as_time_passes() {
        let (clock, bucket) = bucket(2);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());

        clock.advance(Duration::from_millis(500));
        // Half an interval refills one of two tokens.
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[rstest]
    fn reports_time_until_next_token() {
        let (_clock, bucket) = bucket(1);
        assert!(bucket.try_acquire().is_ok());

        let wait = bucket.try_acquire().expect_err("bucket is empty");
        assert!(wait > Duration::from_millis(900));
        assert!(wait <= Duration::from_secs(1));
    }

    #[rstest]
    fn refill_never_exceeds_capacity() {
        let (clock, bucket) = bucket(2);
        clock.advance(Duration::from_secs(60));

        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }
}
