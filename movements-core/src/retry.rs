//! Retry policy for the payment leg of a transfer
//!
//! Exponential backoff with jitter. Only store failures that may clear up
//! on their own are retried.

use crate::config::RetryConfig;
use crate::error::StoreError;
use crate::Error;
use std::time::Duration;

/// Backoff schedule and retryability rules
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    config: RetryConfig,
}

impl RetryStrategy {
    /// Create new strategy
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Retries allowed after the first attempt
    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Delay before the nth retry (0-based) with exponential backoff + jitter
    pub fn calculate_delay(&self, retry: u32) -> Duration {
        let base_delay = self.config.initial_delay_ms as f64
            * self.config.backoff_multiplier.powi(retry as i32);

        // Cap at max_delay
        let capped_delay = base_delay.min(self.config.max_delay_ms as f64);

        // Add jitter to prevent thundering herd
        let jitter_range = capped_delay * self.config.jitter_factor;
        let jitter = (rand::random::<f64>() - 0.5) * jitter_range * 2.0;
        let final_delay = (capped_delay + jitter).max(0.0);

        Duration::from_millis(final_delay as u64)
    }

    /// Determine if an error is worth another attempt
    pub fn is_retryable(&self, error: &Error) -> bool {
        match error {
            Error::Store(store_error) => match store_error {
                // Temporary backend trouble
                StoreError::Backend(_) | StoreError::Unavailable(_) => true,

                // Reference collisions are handled by the writer
                StoreError::DuplicateReference(_) => true,

                StoreError::MovementNotFound(_)
                | StoreError::DuplicateId(_)
                | StoreError::Serialization(_) => false,
            },
            // Writer restarted or response lost
            Error::Concurrency(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(initial: u64, max: u64) -> RetryStrategy {
        RetryStrategy::new(RetryConfig {
            max_retries: 3,
            initial_delay_ms: initial,
            max_delay_ms: max,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0, // No jitter for predictable testing
        })
    }

    #[test]
    fn test_exponential_backoff() {
        let strategy = strategy(1000, 10_000);
        assert_eq!(strategy.calculate_delay(0).as_millis(), 1000);
        assert_eq!(strategy.calculate_delay(1).as_millis(), 2000);
        assert_eq!(strategy.calculate_delay(2).as_millis(), 4000);
    }

    #[test]
    fn test_max_delay_cap() {
        let strategy = strategy(1000, 5000);
        assert!(strategy.calculate_delay(10).as_millis() <= 5000);
    }

    #[test]
    fn test_retryable_errors() {
        let strategy = RetryStrategy::new(RetryConfig::default());

        assert!(strategy.is_retryable(&Error::Store(StoreError::Unavailable("down".into()))));
        assert!(strategy.is_retryable(&Error::Concurrency("closed".into())));
        assert!(!strategy.is_retryable(&Error::Store(StoreError::Serialization("bad".into()))));
        assert!(!strategy.is_retryable(&Error::Config("bad".into())));
    }
}
