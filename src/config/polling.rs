//! Polling configuration.

use serde::Deserialize;
use std::time::Duration;

use super::duration;

/// Intervals for the sleep-based polling loops. There are no streaming
/// feeds; every wait is an explicit sleep between REST calls.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Wait between checks for an inbound BTC deposit to land on the
    /// ZAR-leg venue.
    #[serde(default = "default_deposit_check", with = "duration")]
    pub deposit_check: Duration,
    /// Wait between profit evaluations while the target is missed. Also
    /// the floor for market mode's proportional wait.
    #[serde(default = "default_target_retry", with = "duration")]
    pub target_retry: Duration,
    /// Wait between refreshes of an open sell order.
    #[serde(default = "default_order_status", with = "duration")]
    pub order_status: Duration,
    /// Wait when a partial fill is too small to act on.
    #[serde(default = "default_reconcile_idle", with = "duration")]
    pub reconcile_idle: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            deposit_check: default_deposit_check(),
            target_retry: default_target_retry(),
            order_status: default_order_status(),
            reconcile_idle: default_reconcile_idle(),
        }
    }
}

fn default_deposit_check() -> Duration {
    Duration::from_secs(2)
}

fn default_target_retry() -> Duration {
    Duration::from_secs(1)
}

fn default_order_status() -> Duration {
    Duration::from_secs(1)
}

fn default_reconcile_idle() -> Duration {
    Duration::from_millis(500)
}
