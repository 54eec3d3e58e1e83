//! # Backoff Policy
//!
//! Pure retry-delay calculation shared by every failure path (handler error,
//! timeout, panic, pool rejection). No I/O, no randomness: the delay for
//! attempt `n` is `min(initial * multiplier^(n-1), max)`, rounded to the
//! nearest millisecond.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Deterministic exponential backoff with a ceiling.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    initial_ms: u64,
    multiplier: f64,
    max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial_ms: config.initial_ms,
            multiplier: config.multiplier,
            max_ms: config.max_ms,
        }
    }

    /// Delay before the next attempt, given the attempt count already
    /// incremented by the claim for the attempt that just failed.
    ///
    /// `delay_for_attempt(1) == initial`; the delay never shrinks as
    /// attempts grow and never exceeds the configured maximum.
    pub fn delay_for_attempt(&self, attempt_count: i32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).max(0);
        let raw_ms = self.initial_ms as f64 * self.multiplier.powi(exponent);
        let capped_ms = raw_ms.round().min(self.max_ms as f64).max(0.0) as u64;
        Duration::from_millis(capped_ms)
    }

    /// Same delay as a chrono duration, for `next_attempt_at` arithmetic.
    pub fn chrono_delay_for_attempt(&self, attempt_count: i32) -> chrono::Duration {
        chrono::Duration::milliseconds(self.delay_for_attempt(attempt_count).as_millis() as i64)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn policy(initial_ms: u64, multiplier: f64, max_ms: u64) -> BackoffPolicy {
        BackoffPolicy::new(&BackoffConfig {
            initial_ms,
            multiplier,
            max_ms,
        })
    }

    #[test]
    fn test_first_attempt_gets_initial_delay() {
        let policy = policy(1_000, 2.0, 60_000);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
    }

    #[test]
    fn test_exponential_growth_and_ceiling() {
        let policy = policy(1_000, 2.0, 10_000);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(8_000));
        // 16s capped at the 10s ceiling
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10_000));
        assert_eq!(policy.delay_for_attempt(50), Duration::from_millis(10_000));
    }

    #[test]
    fn test_multiplier_one_is_constant_delay() {
        let policy = policy(500, 1.0, 10_000);
        for attempt in 1..20 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(500));
        }
    }

    #[test]
    fn test_fractional_multiplier_rounds_to_nearest_ms() {
        let policy = policy(100, 1.5, 60_000);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(150));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(225));
        // 337.5 rounds half-up
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(338));
    }

    #[test]
    fn test_non_positive_attempt_treated_as_first() {
        let policy = policy(1_000, 2.0, 60_000);
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for_attempt(-3), Duration::from_millis(1_000));
    }

    proptest! {
        #[test]
        fn prop_monotonic_and_bounded(
            initial_ms in 1u64..10_000,
            multiplier in 1.0f64..8.0,
            max_ms in 10_000u64..1_000_000,
            attempt in 1i32..60,
        ) {
            let policy = policy(initial_ms, multiplier, max_ms);
            let current = policy.delay_for_attempt(attempt);
            let next = policy.delay_for_attempt(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(max_ms));
        }
    }
}
