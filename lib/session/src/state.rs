//! Session state and snapshots.

use lead_intake_core::SessionId;
use serde::{Deserialize, Serialize};

/// Lifecycle state of the transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No session exists.
    #[default]
    Idle,
    /// Connecting to the transport.
    Initializing,
    /// Waiting for the pairing payload to be scanned.
    AwaitingPairing,
    /// Connected and able to send messages.
    Connected,
    /// Connection lost; a retry may be pending.
    Disconnected,
    /// Retries exhausted. Only an explicit reset or start leaves this state.
    Failed,
}

impl SessionState {
    /// Returns true while an attempt is in progress or connected.
    ///
    /// `start_session` is a no-op in these states.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingPairing | Self::Connected
        )
    }

    /// Returns the state name as used in logs and status payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Id of the current (or last failed) attempt.
    pub session_id: Option<SessionId>,
    /// Lifecycle state.
    pub state: SessionState,
    /// Automatic retries used since the last successful connect.
    pub retry_count: u32,
    /// Pairing payload awaiting a scan. Cleared once connected.
    pub last_qr: Option<String>,
}

impl SessionSnapshot {
    /// Returns true if messages can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }
}
