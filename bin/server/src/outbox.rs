//! Conversation replies sent through the supervised session.

use async_trait::async_trait;
use lead_intake_conversation::{Outbox, OutboxError};
use lead_intake_session::SessionManager;

/// [`Outbox`] that delivers replies through the live session.
#[derive(Debug, Clone)]
pub struct SessionOutbox {
    sessions: SessionManager,
}

impl SessionOutbox {
    #[must_use]
    pub fn new(sessions: SessionManager) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Outbox for SessionOutbox {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), OutboxError> {
        if !self.sessions.state().is_connected() {
            return Err(OutboxError::NotConnected);
        }
        self.sessions
            .send_message(recipient, body)
            .await
            .map(|_| ())
            .map_err(|e| OutboxError::DeliveryFailed {
                recipient: recipient.to_string(),
                reason: e.to_string(),
            })
    }
}
