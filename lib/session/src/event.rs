//! Typed lifecycle events published by the session manager.

use lead_intake_core::SessionId;
use serde::{Deserialize, Serialize};

/// Why a session stopped being connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DisconnectReason {
    /// The transport reported the connection lost.
    Transport { reason: String },
    /// An operator tore the session down.
    Teardown,
    /// The process is stopping; credentials were kept.
    Shutdown,
}

/// Lifecycle event of the transport session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// A pairing payload was produced.
    PairingPayload {
        session_id: SessionId,
        payload: String,
    },
    /// The session is connected.
    Ready { session_id: SessionId },
    /// The session lost its connection.
    Disconnected {
        session_id: SessionId,
        reason: DisconnectReason,
    },
    /// The transport rejected the session's credentials.
    AuthFailure {
        session_id: SessionId,
        reason: String,
    },
    /// Retries are exhausted; no further automatic attempts.
    Failed { session_id: SessionId, retries: u32 },
}

impl LifecycleEvent {
    /// Short event name used on notification channels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::PairingPayload { .. } => "qr",
            Self::Ready { .. } => "ready",
            Self::Disconnected { .. } => "disconnected",
            Self::AuthFailure { .. } => "auth_failure",
            Self::Failed { .. } => "failed",
        }
    }

    /// The session the event belongs to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::PairingPayload { session_id, .. }
            | Self::Ready { session_id }
            | Self::Disconnected { session_id, .. }
            | Self::AuthFailure { session_id, .. }
            | Self::Failed { session_id, .. } => *session_id,
        }
    }
}
