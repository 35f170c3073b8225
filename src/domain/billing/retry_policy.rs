//! Retry backoff and dead-letter ceiling.

/// Exponential backoff with a dead-letter ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts beyond this count flag the event for attention.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay_secs: i64,
    /// Upper bound on any single delay.
    pub max_delay_secs: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 300,
            max_delay_secs: 3_600,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt, given attempts made so far.
    ///
    /// `min(base * 2^(attempt_count - 1), max)`.
    pub fn backoff_secs(&self, attempt_count: u32) -> i64 {
        let exponent = attempt_count.saturating_sub(1).min(32);
        self.base_delay_secs
            .saturating_mul(1i64 << exponent)
            .min(self.max_delay_secs)
    }

    /// Returns true once the attempt count passes the ceiling.
    pub fn exhausted(&self, attempt_count: u32) -> bool {
        attempt_count > self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_schedule_doubles_then_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_secs(1), 300);
        assert_eq!(policy.backoff_secs(2), 600);
        assert_eq!(policy.backoff_secs(3), 1_200);
        assert_eq!(policy.backoff_secs(4), 2_400);
        assert_eq!(policy.backoff_secs(5), 3_600);
        assert_eq!(policy.backoff_secs(60), 3_600);
    }

    #[test]
    fn zero_attempts_uses_base_delay() {
        assert_eq!(RetryPolicy::default().backoff_secs(0), 300);
    }

    #[test]
    fn exhausted_only_after_ceiling() {
        let policy = RetryPolicy::default();
        assert!(!policy.exhausted(3));
        assert!(policy.exhausted(4));
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_bounded(
            base in 1i64..10_000,
            extra in 0i64..100_000,
            attempt in 0u32..200,
        ) {
            let policy = RetryPolicy { max_attempts: 3, base_delay_secs: base, max_delay_secs: base + extra };
            let delay = policy.backoff_secs(attempt);
            prop_assert!(delay >= base.min(policy.max_delay_secs));
            prop_assert!(delay <= policy.max_delay_secs);
            prop_assert!(policy.backoff_secs(attempt + 1) >= delay);
        }
    }
}
