//! Retry policy and bounded retry loop

use crate::clock::Clock;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// `initial × (attempt + 1)`
    Linear,
    /// `initial × 2^attempt`
    Exponential,
}

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first
    pub max_attempts: u32,
    /// Base delay
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Growth strategy
    pub strategy: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
        }
    }
}

impl RetryConfig {
    /// Three attempts, 500 ms × attempt between them
    pub fn static_file() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            strategy: BackoffStrategy::Linear,
        }
    }

    /// Exponential policy used by the bootstrap monitor loop
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: base,
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
        }
    }

    /// Delay to wait after the zero-based `attempt` failed
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor: u32 = match self.strategy {
            BackoffStrategy::Linear => attempt.saturating_add(1),
            BackoffStrategy::Exponential => 2u32.saturating_pow(attempt),
        };
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Run `f` until it succeeds or the attempts are used up, sleeping on `clock`
/// between attempts. Returns the last error on exhaustion.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    clock: &dyn Clock,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match f(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if attempt + 1 >= attempts {
                    warn!("All {} attempts failed: {}", attempts, e);
                    return Err(e);
                }

                let delay = config.delay_for(attempt);
                debug!(
                    "Attempt {} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    e,
                    delay
                );
                clock.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;

    #[test]
    fn test_linear_delays() {
        let config = RetryConfig::static_file();
        assert_eq!(config.delay_for(0), Duration::from_millis(500));
        assert_eq!(config.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(config.delay_for(2), Duration::from_millis(1_500));
    }

    #[test]
    fn test_exponential_delays_capped() {
        let config = RetryConfig::exponential(3, Duration::from_secs(1));
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        assert_eq!(config.delay_for(40), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_retry_success() {
        let clock = ManualClock::default();
        let result = retry_with_backoff(&RetryConfig::static_file(), &clock, |attempt| async move {
            if attempt < 1 {
                Err("not yet")
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn test_retry_failure_returns_last_error() {
        let clock = ManualClock::default();
        let result: std::result::Result<(), String> = tokio_test::block_on(retry_with_backoff(
            &RetryConfig::static_file(),
            &clock,
            |attempt| async move { Err(format!("failure {}", attempt)) },
        ));

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(500), Duration::from_millis(1_000)]
        );
    }
}
