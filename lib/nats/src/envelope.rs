//! Versioned envelope for everything written to NATS.
//!
//! KV values, gateway requests, gateway events and notifications all travel
//! as `{"version": N, "payload": ...}`. Readers refuse versions newer than
//! they understand instead of guessing.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The envelope version this build writes.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned wrapper around a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub version: u32,
    pub payload: T,
}

/// Errors encoding or opening an envelope.
#[derive(Debug)]
pub enum EnvelopeError {
    /// The bytes were not a valid envelope of the expected payload.
    Json(serde_json::Error),
    /// The envelope was written by a newer version.
    UnsupportedVersion { found: u32 },
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json(e) => write!(f, "malformed envelope: {e}"),
            Self::UnsupportedVersion { found } => write!(
                f,
                "envelope version {found} is newer than supported version {CURRENT_VERSION}"
            ),
        }
    }
}

impl std::error::Error for EnvelopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::UnsupportedVersion { .. } => None,
        }
    }
}

impl<T> Envelope<T> {
    /// Wraps a payload at the current version.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            version: CURRENT_VERSION,
            payload,
        }
    }

    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Wraps and encodes a payload in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized.
    pub fn seal(payload: T) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(&Self::new(payload)).map_err(EnvelopeError::Json)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes an envelope and returns its payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are malformed or the version is newer
    /// than [`CURRENT_VERSION`].
    pub fn open(bytes: &[u8]) -> Result<T, EnvelopeError> {
        let envelope: Self = serde_json::from_slice(bytes).map_err(EnvelopeError::Json)?;
        if envelope.version > CURRENT_VERSION {
            return Err(EnvelopeError::UnsupportedVersion {
                found: envelope.version,
            });
        }
        Ok(envelope.payload)
    }
}
