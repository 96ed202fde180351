//! The notification channel contract.

use crate::error::NotifyError;
use async_trait::async_trait;

/// A channel lifecycle notifications are published on.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publishes `payload` under `event`.
    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), NotifyError>;
}
