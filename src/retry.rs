//! Retry delay policy for the queue strategy.
//!
//! Retries are a state-machine edge (`Executing -> Pending` with a fresh
//! delayed enqueue), not exception unwinding, so the delay computation is a
//! standalone pure function of the attempt counter.

use std::time::Duration;

/// Exponential backoff with a ceiling: `delay(k) = min(base * 2^k, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry (attempt 0 would see `base`; in
    /// practice the first failure re-enqueues with `base * 2^1` because
    /// the attempt counter has already advanced past the initial attempt).
    pub base: Duration,
    /// Upper bound on any computed delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            cap: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to apply before redelivering after `attempt` executions have
    /// already run. Saturates at `cap`; never overflows for large attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = (self.base.as_millis() as u64).saturating_mul(factor);
        Duration::from_millis(millis).min(self.cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn doubles_until_cap() {
        let p = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(p.delay_for(0), Duration::from_secs(1));
        assert_eq!(p.delay_for(1), Duration::from_secs(2));
        assert_eq!(p.delay_for(2), Duration::from_secs(4));
        assert_eq!(p.delay_for(5), Duration::from_secs(32));
        assert_eq!(p.delay_for(6), Duration::from_secs(60));
        assert_eq!(p.delay_for(20), Duration::from_secs(60));
    }

    #[test]
    fn huge_attempt_counts_saturate() {
        let p = RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(300));
        assert_eq!(p.delay_for(u32::MAX), Duration::from_secs(300));
        assert_eq!(p.delay_for(63), Duration::from_secs(300));
        assert_eq!(p.delay_for(64), Duration::from_secs(300));
    }

    proptest! {
        /// Delays are monotonically non-decreasing in the attempt counter
        /// and never exceed the cap.
        #[test]
        fn monotonic_and_capped(base_ms in 1u64..10_000, cap_ms in 1u64..600_000, attempt in 0u32..80) {
            let p = RetryPolicy::new(Duration::from_millis(base_ms), Duration::from_millis(cap_ms));
            let d0 = p.delay_for(attempt);
            let d1 = p.delay_for(attempt + 1);
            prop_assert!(d0 <= d1);
            prop_assert!(d1 <= p.cap);
        }
    }
}
