//! Error types for the conversation crate.
//!
//! Every error here comes from a best-effort collaborator call. The engine
//! and effect runner log them; none of them abort a conversation.
//! - `ContactError`: Errors from contact storage
//! - `TrackerError`: Errors from the task tracker
//! - `OutboxError`: Errors delivering a reply

use std::fmt;

/// Errors from contact storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactError {
    /// A contact with this phone already exists.
    AlreadyExists { phone: String },
    /// A stored record could not be decoded.
    Corrupted { phone: String, reason: String },
    /// Storage backend could not be reached or refused the operation.
    StorageFailed { reason: String },
}

impl fmt::Display for ContactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists { phone } => write!(f, "contact already exists: {phone}"),
            Self::Corrupted { phone, reason } => {
                write!(f, "contact record for {phone} is corrupted: {reason}")
            }
            Self::StorageFailed { reason } => write!(f, "contact storage failed: {reason}"),
        }
    }
}

impl std::error::Error for ContactError {}

/// Errors from the task tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// The tracker refused our credentials.
    Unauthorized,
    /// The tracker rejected the request.
    Rejected { reason: String },
    /// The request never got an answer.
    RequestFailed { reason: String },
    /// The answer could not be understood.
    InvalidResponse { reason: String },
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthorized => write!(f, "task tracker rejected credentials"),
            Self::Rejected { reason } => write!(f, "task tracker rejected request: {reason}"),
            Self::RequestFailed { reason } => write!(f, "task tracker request failed: {reason}"),
            Self::InvalidResponse { reason } => {
                write!(f, "invalid task tracker response: {reason}")
            }
        }
    }
}

impl std::error::Error for TrackerError {}

/// Errors delivering a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboxError {
    /// There is no connected session to send through.
    NotConnected,
    /// Delivery failed.
    DeliveryFailed { recipient: String, reason: String },
}

impl fmt::Display for OutboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "no connected session for replies"),
            Self::DeliveryFailed { recipient, reason } => {
                write!(f, "reply to '{recipient}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for OutboxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_error_display() {
        let err = ContactError::AlreadyExists {
            phone: "5511999990000@c.us".to_string(),
        };
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn tracker_error_display() {
        let err = TrackerError::Rejected {
            reason: "board not found".to_string(),
        };
        assert!(err.to_string().contains("board not found"));
    }
}
