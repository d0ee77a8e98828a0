//! Push notifications for trade progress and operator-attention events.

mod pushover;

use thiserror::Error;

pub use pushover::PushoverNotifier;

/// Notification delivery errors.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The provider rejected the message.
    #[error("notification rejected: {0}")]
    Rejected(String),

    /// Transport error.
    #[error("notification request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Notifier delivers a message to the operator.
///
/// Urgent messages are for conditions needing manual intervention, such
/// as an externally cancelled sell order or a skipped withdrawal; the
/// implementation decides how urgency maps onto the provider.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str, urgent: bool) -> Result<(), NotificationError>;
}

/// NoopNotifier discards everything. Used when no provider is configured
/// and in tests.
pub struct NoopNotifier;

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _message: &str, _urgent: bool) -> Result<(), NotificationError> {
        Ok(())
    }
}
