//! Error types for the NATS adapters.

use std::fmt;

/// Errors setting up NATS resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NatsError {
    /// The server could not be reached.
    ConnectionFailed { url: String, reason: String },
    /// A KV bucket could not be opened or created.
    BucketUnavailable { bucket: String, reason: String },
}

impl fmt::Display for NatsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { url, reason } => {
                write!(f, "failed to connect to NATS at {url}: {reason}")
            }
            Self::BucketUnavailable { bucket, reason } => {
                write!(f, "KV bucket '{bucket}' unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for NatsError {}
