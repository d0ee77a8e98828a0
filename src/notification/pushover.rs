//! Pushover delivery.

use std::time::Duration;

use crate::config::PushoverConfig;
use crate::notification::{NotificationError, Notifier};

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Pushover rejects messages longer than this.
const MAX_MESSAGE_LENGTH: usize = 1024;

/// PushoverNotifier sends messages through the Pushover API.
pub struct PushoverNotifier {
    config: PushoverConfig,
    http_client: reqwest::Client,
}

impl PushoverNotifier {
    pub fn new(config: PushoverConfig) -> Result<Self, NotificationError> {
        if config.app_token.is_empty() {
            return Err(NotificationError::Rejected("app_token is required".into()));
        }
        if config.user_key.is_empty() {
            return Err(NotificationError::Rejected("user_key is required".into()));
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()?;

        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for PushoverNotifier {
    async fn send(&self, message: &str, urgent: bool) -> Result<(), NotificationError> {
        let message = truncate(message, MAX_MESSAGE_LENGTH);

        let mut form = vec![
            ("token", self.config.app_token.as_str()),
            ("user", self.config.user_key.as_str()),
            ("message", message),
        ];
        if urgent {
            // High priority bypasses the receiving device's quiet hours.
            form.push(("priority", "1"));
            form.push(("title", "Attention needed"));
        } else {
            form.push(("priority", "0"));
        }
        if let Some(device) = &self.config.device {
            form.push(("device", device.as_str()));
        }

        let response = self
            .http_client
            .post(PUSHOVER_API_URL)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(NotificationError::Rejected(format!("{} - {}", status, body)));
        }

        Ok(())
    }
}

/// Truncates on a char boundary at or below `max` bytes.
fn truncate(message: &str, max: usize) -> &str {
    if message.len() <= max {
        return message;
    }
    let mut end = max;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}
