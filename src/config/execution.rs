//! Execution configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// API call timeouts and retries.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// HTTP request timeout for exchange API calls.
    #[serde(default = "default_timeout", with = "duration")]
    pub timeout: Duration,
    /// Retry behavior for failed API calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry settings for failed operations.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts for read-style calls.
    pub max_attempts: Option<i32>,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay", with = "duration")]
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    #[serde(default = "default_max_delay", with = "duration")]
    pub max_delay: Duration,
    /// Factor by which delay increases after each retry.
    pub multiplier: Option<f64>,
    /// Tighter attempt ceiling for order placement, where retrying a call
    /// whose first attempt may have gone through is riskier.
    pub placement_max_attempts: Option<i32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: None,
            placement_max_attempts: None,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}
