//! The messaging transport capability.
//!
//! The transport itself (wire protocol, pairing, message delivery) lives
//! outside this crate. Everything here describes the contract the session
//! manager relies on.

use crate::error::TransportError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lead_intake_core::{MessageId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Address suffix the transport uses for one-to-one chats.
pub const DIRECT_CHAT_SUFFIX: &str = "@c.us";

/// Opaque credential blob produced by the transport after pairing.
///
/// The contents are never logged.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(Vec<u8>);

impl Credentials {
    /// Wraps raw credential bytes.
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the credentials, returning the raw bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credentials({} bytes)", self.0.len())
    }
}

/// The kind of chat an inbound message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// One-to-one chat with a contact.
    Direct,
    /// Group chat.
    Group,
    /// Broadcast list.
    Broadcast,
    /// Status update.
    Status,
}

impl MessageKind {
    /// Classifies a transport address by its suffix.
    #[must_use]
    pub fn from_address(address: &str) -> Self {
        if address.ends_with(DIRECT_CHAT_SUFFIX) {
            Self::Direct
        } else if address.ends_with("@g.us") {
            Self::Group
        } else if address.starts_with("status@") {
            Self::Status
        } else {
            Self::Broadcast
        }
    }
}

/// A message received by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport address of the sender.
    pub sender: String,
    /// Message text.
    pub body: String,
    /// The kind of chat it arrived in.
    pub kind: MessageKind,
    /// Display name the sender chose, if the transport knows it.
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl InboundMessage {
    /// Creates a direct message.
    #[must_use]
    pub fn direct(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            kind: MessageKind::Direct,
            sender_name: None,
        }
    }

    /// Sets the sender display name.
    #[must_use]
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }
}

/// Events emitted by a transport connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A pairing payload must be shown to the companion device.
    PairingPayload(String),
    /// The connection is ready to send and receive.
    Ready,
    /// The transport persisted fresh credentials for this session.
    CredentialsSaved(Credentials),
    /// The connection was lost.
    Disconnected { reason: String },
    /// The stored credentials were rejected.
    AuthFailure { reason: String },
    /// A message arrived.
    MessageReceived(InboundMessage),
}

/// Stream of events for one connection attempt.
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Connection states as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Opening,
    Pairing,
    Unpaired,
    UnpairedIdle,
    Conflict,
    Timeout,
    DeprecatedVersion,
    Disconnected,
}

impl ConnectionState {
    /// Returns true if messages can be sent.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Acknowledgment that the transport accepted an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Local identifier of the message.
    pub id: MessageId,
    /// Recipient address.
    pub recipient: String,
    /// Transport-side message reference, if it returned one.
    pub transport_ref: Option<String>,
    /// When the transport accepted it.
    pub accepted_at: DateTime<Utc>,
}

impl DeliveryReceipt {
    /// Creates a receipt for a message accepted now.
    #[must_use]
    pub fn accepted(recipient: impl Into<String>, transport_ref: Option<String>) -> Self {
        Self {
            id: MessageId::new(),
            recipient: recipient.into(),
            transport_ref,
            accepted_at: Utc::now(),
        }
    }
}

/// The messaging transport capability.
///
/// At most one `connect` is meaningful per live handle. The session manager
/// never runs `connect` and `disconnect` concurrently, and always names the
/// session it is releasing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Starts connecting with the given session id and stored credentials.
    ///
    /// Lifecycle events for this attempt arrive on the returned stream.
    async fn connect(
        &self,
        session_id: SessionId,
        credentials: Option<Credentials>,
    ) -> Result<TransportEvents, TransportError>;

    /// Sends a text message. Fails with `NotConnected` before `Ready`.
    async fn send_message(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, TransportError>;

    /// Queries the transport's own view of the connection.
    async fn connection_state(&self) -> Result<ConnectionState, TransportError>;

    /// Releases the connection opened for `session_id`.
    ///
    /// Must leave any newer connection untouched; an id that is no longer
    /// current is a no-op.
    async fn disconnect(&self, session_id: SessionId) -> Result<(), TransportError>;
}

/// Normalizes a recipient to the transport's direct-chat address form.
///
/// Bare numbers get the direct-chat suffix; anything already containing
/// `@` is passed through.
#[must_use]
pub fn normalize_recipient(recipient: &str) -> String {
    let trimmed = recipient.trim();
    if trimmed.contains('@') {
        trimmed.to_string()
    } else {
        format!("{trimmed}{DIRECT_CHAT_SUFFIX}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_from_address() {
        assert_eq!(
            MessageKind::from_address("5511999990000@c.us"),
            MessageKind::Direct
        );
        assert_eq!(
            MessageKind::from_address("120363025@g.us"),
            MessageKind::Group
        );
        assert_eq!(
            MessageKind::from_address("status@broadcast"),
            MessageKind::Status
        );
        assert_eq!(
            MessageKind::from_address("1234@broadcast"),
            MessageKind::Broadcast
        );
    }

    #[test]
    fn normalize_bare_number() {
        assert_eq!(normalize_recipient("5511999990000"), "5511999990000@c.us");
        assert_eq!(normalize_recipient(" 5511999990000 "), "5511999990000@c.us");
    }

    #[test]
    fn normalize_keeps_full_addresses() {
        assert_eq!(normalize_recipient("5511999990000@c.us"), "5511999990000@c.us");
        assert_eq!(normalize_recipient("120363025@g.us"), "120363025@g.us");
    }

    #[test]
    fn credentials_debug_hides_contents() {
        let creds = Credentials::new(b"secret-token".to_vec());
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("12 bytes"));
    }

    #[test]
    fn connection_state_uses_transport_vocabulary() {
        let json = serde_json::to_string(&ConnectionState::UnpairedIdle).expect("serialize");
        assert_eq!(json, "\"UNPAIRED_IDLE\"");
    }
}
