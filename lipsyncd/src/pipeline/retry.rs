//! Retry policy for transient stage failures.

use std::time::Duration;

/// Exponential-backoff retry policy applied per stage attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub use_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Check whether another attempt is allowed after `attempt` failures
    /// (0-indexed: `attempt == 0` is the first failure).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Backoff delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay_ms as f64) as u64;

        if self.use_jitter {
            let jitter = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
            Duration::from_millis(capped + jitter)
        } else {
            Duration::from_millis(capped)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_retries() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_no_retry() {
        assert!(!RetryPolicy::no_retry().should_retry(0));
    }

    #[test]
    fn test_backoff_doubles_without_jitter() {
        let policy = RetryPolicy {
            max_retries: 4,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 10,
            initial_delay_ms: 1_000,
            max_delay_ms: 3_000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        };
        assert_eq!(policy.delay_for_attempt(7), Duration::from_millis(3_000));
    }

    #[test]
    fn test_jitter_stays_within_bound() {
        let policy = RetryPolicy {
            max_retries: 1,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: true,
        };
        for _ in 0..32 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_millis(1_000));
            assert!(delay <= Duration::from_millis(1_250));
        }
    }
}
