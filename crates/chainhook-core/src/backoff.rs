//! Capped exponential backoff and retry accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::Resolution;

/// Retry policy for failed webhook deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Retries allowed after the first failure before the event is FAILED.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl BackoffPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// `min(2^retry_count * base_delay, max_delay)`, saturating.
    pub fn delay(&self, retry_count: u32) -> Duration {
        let factor = 1u32.checked_shl(retry_count).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Outcome of a failed try for an event that has already been retried
    /// `retry_count` times.
    pub fn on_failure(&self, retry_count: u32, now: DateTime<Utc>) -> Resolution {
        if retry_count >= self.max_retries {
            return Resolution::Failed;
        }
        let next = retry_count + 1;
        let delay = chrono::Duration::from_std(self.delay(next))
            .unwrap_or_else(|_| chrono::Duration::seconds(self.max_delay.as_secs() as i64));
        Resolution::Retry {
            retry_count: next,
            next_retry_at: now + delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(5, Duration::from_secs(10), Duration::from_secs(3600))
    }

    #[test]
    fn delay_doubles_until_cap() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::from_secs(10));
        assert_eq!(p.delay(1), Duration::from_secs(20));
        assert_eq!(p.delay(3), Duration::from_secs(80));
        assert_eq!(p.delay(9), Duration::from_secs(3600));
        assert_eq!(p.delay(64), Duration::from_secs(3600));
    }

    #[test]
    fn delay_is_monotonic() {
        let p = policy();
        let mut prev = Duration::ZERO;
        for n in 0..40 {
            let d = p.delay(n);
            assert!(d >= prev, "delay({n}) = {d:?} < {prev:?}");
            assert!(d <= p.max_delay);
            prev = d;
        }
    }

    #[test]
    fn failure_increments_until_budget_spent() {
        let p = policy();
        let now = Utc::now();
        match p.on_failure(0, now) {
            Resolution::Retry {
                retry_count,
                next_retry_at,
            } => {
                assert_eq!(retry_count, 1);
                assert_eq!(next_retry_at, now + chrono::Duration::seconds(20));
            }
            other => panic!("expected retry, got {other:?}"),
        }
        assert!(matches!(p.on_failure(4, now), Resolution::Retry { retry_count: 5, .. }));
        assert_eq!(p.on_failure(5, now), Resolution::Failed);
    }

    #[test]
    fn zero_retries_fails_immediately() {
        let p = BackoffPolicy::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(p.on_failure(0, Utc::now()), Resolution::Failed);
    }
}
