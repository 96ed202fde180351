//! Error types for the bridge crate.

use std::fmt;

/// Errors publishing a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    /// The payload could not be encoded.
    Encode { event: String, reason: String },
    /// The channel refused or failed to take the notification.
    PublishFailed { event: String, reason: String },
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encode { event, reason } => {
                write!(f, "failed to encode '{event}' notification: {reason}")
            }
            Self::PublishFailed { event, reason } => {
                write!(f, "failed to publish '{event}' notification: {reason}")
            }
        }
    }
}

impl std::error::Error for NotifyError {}
