//! Retry policy for exchange API calls.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::exchanges::Result;

/// Default attempt ceiling for idempotent calls.
const DEFAULT_MAX_ATTEMPTS: u32 = 50;

/// Tighter default ceiling for order placement.
const DEFAULT_PLACEMENT_MAX_ATTEMPTS: u32 = 10;

/// Default backoff multiplier.
const DEFAULT_MULTIPLIER: f64 = 1.05;

/// RetryPolicy retries transient failures with exponential backoff.
///
/// Only errors for which
/// [`ExchangeError::is_retryable`](crate::exchanges::ExchangeError::is_retryable)
/// holds are retried; everything else propagates from the first attempt.
/// Exhausting the ceiling propagates the last error.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl RetryPolicy {
    /// Creates a policy with explicit parameters.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// Creates the policy for idempotent calls from the retry config.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config
                .max_attempts
                .filter(|&n| n > 0)
                .map(|n| n as u32)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            config.initial_delay,
            config.max_delay,
            config.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
        )
    }

    /// Creates the tighter policy used around order placement.
    pub fn for_placement(config: &RetryConfig) -> Self {
        Self::new(
            config
                .placement_max_attempts
                .filter(|&n| n > 0)
                .map(|n| n as u32)
                .unwrap_or(DEFAULT_PLACEMENT_MAX_ATTEMPTS),
            config.initial_delay,
            config.max_delay,
            config.multiplier.unwrap_or(DEFAULT_MULTIPLIER),
        )
    }

    /// Calls `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt ceiling is reached.
    pub async fn run<T, F, Fut>(&self, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut delay = self.initial_delay;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_retryable() || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient exchange error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = Duration::min(delay.mul_f64(self.multiplier), self.max_delay);
                }
            }
        }
    }
}
