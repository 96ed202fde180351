//! Lifecycle notifications as NATS messages.

use crate::config::NatsConfig;
use crate::envelope::Envelope;
use async_nats::Client;
use async_trait::async_trait;
use lead_intake_bridge::{Notifier, NotifyError};
use tracing::debug;

/// Publishes notifications on `<prefix>.events.<event>`.
#[derive(Debug, Clone)]
pub struct NatsNotifier {
    client: Client,
    config: NatsConfig,
}

impl NatsNotifier {
    #[must_use]
    pub fn new(client: Client, config: NatsConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn publish(&self, event: &str, payload: serde_json::Value) -> Result<(), NotifyError> {
        let bytes = Envelope::seal(payload).map_err(|e| NotifyError::Encode {
            event: event.to_string(),
            reason: e.to_string(),
        })?;
        let subject = self.config.notification_subject(event);

        self.client
            .publish(subject.clone(), bytes.into())
            .await
            .map_err(|e| NotifyError::PublishFailed {
                event: event.to_string(),
                reason: e.to_string(),
            })?;
        debug!(subject = %subject, "notification published");
        Ok(())
    }
}
