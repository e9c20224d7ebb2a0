//! Retry policy for relay calls.

use std::time::Duration;

use kr_core::config::RelayConfig;

/// Exponential backoff between relay attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub multiplier: f64,
    /// Maximum number of attempts (None = unlimited).
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Bounded policy for outbound sends.
    pub fn for_sends(config: &RelayConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.retry_initial_ms),
            max_delay: Duration::from_millis(config.retry_max_ms),
            max_attempts: Some(config.retry_max_attempts),
            ..Self::default()
        }
    }

    /// Unbounded policy for the receive poller.
    pub fn for_polling(config: &RelayConfig) -> Self {
        Self {
            max_attempts: None,
            ..Self::for_sends(config)
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
        self.initial_delay
            .mul_f64(self.multiplier.powi(exponent))
            .min(self.max_delay)
    }

    /// Whether another attempt should be made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(4)); // capped
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(4));
    }

    #[test]
    fn send_policy_honours_max_attempts() {
        let config = RelayConfig {
            retry_max_attempts: 3,
            ..RelayConfig::default()
        };
        let policy = RetryPolicy::for_sends(&config);

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));
    }

    #[test]
    fn polling_retries_forever() {
        let policy = RetryPolicy::for_polling(&RelayConfig::default());
        assert!(policy.should_retry(0));
        assert!(policy.should_retry(u32::MAX));
    }
}
