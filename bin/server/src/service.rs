//! The operations the agent exposes to an operator surface.
//!
//! [`IntakeService`] wires the session supervisor, the conversation engine
//! and the event bridge together and offers one method per operation:
//! start, status, teardown, shutdown, retry reset, arbitrary send and
//! inbound handling, plus a few read-only queries.

use crate::error::ServiceError;
use crate::outbox::SessionOutbox;
use lead_intake_bridge::{EventBridge, Notifier};
use lead_intake_conversation::{
    ContactRecord, ContactRepository, ConversationEngine, Dispatcher, EffectRunner, Incoming,
    IntakeScript, TaskTracker,
};
use lead_intake_session::{
    ConnectionState, DeliveryReceipt, InboundMessage, InboundMessages, MessageKind, RetryPolicy,
    SessionManager, SessionSnapshot, SessionStore, StaleCleanup, StartOutcome, Transport,
    normalize_recipient,
};
use lead_intake_core::Result;
use rootcause::prelude::ResultExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

/// The external collaborators the service runs against.
pub struct Adapters {
    pub transport: Arc<dyn Transport>,
    pub sessions: Arc<dyn SessionStore>,
    pub contacts: Arc<dyn ContactRepository>,
    pub tracker: Arc<dyn TaskTracker>,
    pub notifier: Arc<dyn Notifier>,
}

/// Background tasks of a running service.
#[derive(Debug)]
pub struct Workers {
    bridge: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl Workers {
    /// Stops the event bridge and the inbound loop.
    pub async fn shutdown(self) {
        self.bridge.abort();
        self.inbound.abort();
        let _ = self.bridge.await;
        let _ = self.inbound.await;
        debug!("service workers stopped");
    }
}

/// The lead intake agent.
#[derive(Clone)]
pub struct IntakeService {
    sessions: SessionManager,
    contacts: Arc<dyn ContactRepository>,
    dispatcher: Dispatcher,
    bridge: EventBridge,
}

impl IntakeService {
    /// Builds the service. Inbound direct messages arrive on the returned
    /// queue; hand it to [`spawn_workers`](Self::spawn_workers).
    #[must_use]
    pub fn new(
        adapters: Adapters,
        policy: RetryPolicy,
        script: IntakeScript,
    ) -> (Self, InboundMessages) {
        let (sessions, inbound) =
            SessionManager::new(adapters.transport, adapters.sessions, policy);

        let engine = Arc::new(ConversationEngine::new(adapters.contacts.clone(), script));
        let runner = EffectRunner::new(
            Arc::new(SessionOutbox::new(sessions.clone())),
            adapters.contacts.clone(),
            adapters.tracker,
        );

        let service = Self {
            sessions,
            contacts: adapters.contacts,
            dispatcher: Dispatcher::new(engine, runner),
            bridge: EventBridge::new(adapters.notifier),
        };
        (service, inbound)
    }

    /// Starts relaying lifecycle events and dispatching inbound messages.
    pub fn spawn_workers(&self, mut inbound: InboundMessages) -> Workers {
        let bridge = self.bridge.clone().spawn(self.sessions.subscribe());

        let service = self.clone();
        let inbound = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                service.handle_inbound(message);
            }
            debug!("inbound queue closed");
        });

        Workers { bridge, inbound }
    }

    /// The session supervisor.
    #[must_use]
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub async fn start_session(&self) -> StartOutcome {
        self.sessions.start_session().await
    }

    #[must_use]
    pub fn session_status(&self) -> SessionSnapshot {
        self.sessions.state()
    }

    /// Tears the session down. Returns false if it was already idle.
    pub async fn teardown(&self) -> bool {
        self.sessions.teardown().await
    }

    /// Disconnects for process exit, keeping stored credentials so the next
    /// boot resumes without pairing.
    pub async fn shutdown(&self) -> bool {
        self.sessions.shutdown().await
    }

    pub fn reset_retry_counter(&self) {
        self.sessions.reset_retry_counter();
    }

    /// The pairing payload waiting for a scan, if any.
    #[must_use]
    pub fn pairing_payload(&self) -> Option<String> {
        self.sessions
            .state()
            .last_qr
            .or_else(|| self.bridge.last_pairing_payload())
    }

    #[must_use]
    pub fn has_stored_session(&self) -> bool {
        self.sessions.has_stored_session()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.sessions.connection_state().await
    }

    /// Sends a message outside any conversation.
    ///
    /// Bare numbers are turned into direct-chat addresses.
    ///
    /// # Errors
    ///
    /// Fails with a `NoActiveSession` cause unless the session is connected,
    /// or with the transport's reason if delivery fails.
    #[instrument(skip(self, body))]
    pub async fn send_arbitrary(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, ServiceError> {
        let recipient = normalize_recipient(recipient);
        let receipt = self
            .sessions
            .send_message(&recipient, body)
            .await
            .context(ServiceError::SendFailed)?;
        info!(recipient = %receipt.recipient, message_id = %receipt.id, "arbitrary message sent");
        Ok(receipt)
    }

    /// Queues an inbound message for its sender's conversation.
    ///
    /// Returns false if the message is not a direct message.
    pub fn handle_inbound(&self, message: InboundMessage) -> bool {
        if message.kind != MessageKind::Direct {
            debug!(sender = %message.sender, kind = ?message.kind, "not a direct message");
            return false;
        }

        let mut incoming = Incoming::new(message.sender, message.body);
        if let Some(name) = message.sender_name {
            incoming = incoming.with_display_name(name);
        }
        self.dispatcher.submit(incoming);
        true
    }

    /// Every known contact, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the contact repository cannot be read.
    pub async fn list_contacts(&self) -> Result<Vec<ContactRecord>, ServiceError> {
        self.contacts
            .list_all()
            .await
            .context(ServiceError::ContactsUnavailable)
    }

    /// Drops every stored session but the newest.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored sessions cannot be listed.
    pub async fn cleanup_stale_sessions(&self) -> Result<StaleCleanup, ServiceError> {
        self.sessions
            .cleanup_stale_sessions()
            .await
            .context(ServiceError::SessionCleanupFailed)
    }
}

impl std::fmt::Debug for IntakeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntakeService")
            .field("sessions", &self.sessions)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
