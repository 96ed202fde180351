//! Error types for the session crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `TransportError`: Errors reported by the messaging transport
//! - `SessionStoreError`: Errors from credential storage
//! - `SessionError`: High-level errors surfaced by the session manager

use lead_intake_core::SessionId;
use std::fmt;

/// Errors reported by the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport has no ready connection.
    NotConnected,
    /// Establishing the connection failed.
    ConnectFailed { reason: String },
    /// The transport refused or failed to deliver a message.
    SendFailed { recipient: String, reason: String },
    /// The transport answered with something we could not understand.
    Protocol { reason: String },
    /// The transport did not answer in time.
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "transport is not connected"),
            Self::ConnectFailed { reason } => write!(f, "transport connect failed: {reason}"),
            Self::SendFailed { recipient, reason } => {
                write!(f, "sending to '{recipient}' failed: {reason}")
            }
            Self::Protocol { reason } => write!(f, "transport protocol error: {reason}"),
            Self::Timeout => write!(f, "transport request timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors from session credential storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    /// Storage backend could not be reached or refused the operation.
    StorageFailed { reason: String },
    /// A stored blob could not be decoded.
    Corrupted { id: SessionId, reason: String },
}

impl fmt::Display for SessionStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StorageFailed { reason } => write!(f, "session storage failed: {reason}"),
            Self::Corrupted { id, reason } => {
                write!(f, "stored session {id} is corrupted: {reason}")
            }
        }
    }
}

impl std::error::Error for SessionStoreError {}

/// High-level session errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The operation needs a connected session and there is none.
    NoActiveSession,
    /// Delivering a message through the live session failed.
    DeliveryFailed { recipient: String, reason: String },
    /// Session storage could not be inspected.
    Storage { reason: String },
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoActiveSession => write!(f, "no active session"),
            Self::DeliveryFailed { recipient, reason } => {
                write!(f, "delivery to '{recipient}' failed: {reason}")
            }
            Self::Storage { reason } => write!(f, "session storage unavailable: {reason}"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_display() {
        let err = TransportError::SendFailed {
            recipient: "5511999990000@c.us".to_string(),
            reason: "rejected".to_string(),
        };
        assert!(err.to_string().contains("5511999990000@c.us"));
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn no_active_session_is_distinct() {
        assert_eq!(SessionError::NoActiveSession.to_string(), "no active session");
    }

    #[test]
    fn store_error_names_the_session() {
        let id = SessionId::new();
        let err = SessionStoreError::Corrupted {
            id,
            reason: "bad envelope".to_string(),
        };
        assert!(err.to_string().contains(&id.to_string()));
    }
}
