//! Notification configuration.

use serde::Deserialize;

/// Notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Pushover push notifications.
    pub pushover: Option<PushoverConfig>,
}

/// Pushover notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PushoverConfig {
    /// Whether Pushover notifications are active.
    #[serde(default)]
    pub enabled: bool,
    /// Application token (loaded from PUSHOVER_APP_TOKEN env var).
    #[serde(skip)]
    pub app_token: String,
    /// User key (loaded from PUSHOVER_USER_KEY env var).
    #[serde(skip)]
    pub user_key: String,
    /// Target device name; all devices when unset.
    pub device: Option<String>,
}
