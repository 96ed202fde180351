//! Durable storage for transport session credentials.

use crate::error::SessionStoreError;
use crate::transport::Credentials;
use async_trait::async_trait;
use lead_intake_core::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Key/value storage for credential blobs, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Stores (or replaces) the blob for a session.
    async fn save(&self, id: SessionId, credentials: Credentials)
    -> Result<(), SessionStoreError>;

    /// Loads the blob for a session, if one is stored.
    async fn load(&self, id: SessionId) -> Result<Option<Credentials>, SessionStoreError>;

    /// Deletes the blob for a session. Deleting a missing entry succeeds.
    async fn delete(&self, id: SessionId) -> Result<(), SessionStoreError>;

    /// Lists the ids of all stored sessions.
    async fn list(&self) -> Result<Vec<SessionId>, SessionStoreError>;
}

/// Process-local session store.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionStore {
    entries: Arc<RwLock<HashMap<SessionId, Credentials>>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or_default()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a blob is stored for the session.
    #[must_use]
    pub fn contains(&self, id: SessionId) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(&id))
            .unwrap_or_default()
    }

    fn poisoned() -> SessionStoreError {
        SessionStoreError::StorageFailed {
            reason: "in-memory store lock poisoned".to_string(),
        }
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(
        &self,
        id: SessionId,
        credentials: Credentials,
    ) -> Result<(), SessionStoreError> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(id, credentials);
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<Credentials>, SessionStoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| Self::poisoned())?
            .get(&id)
            .cloned())
    }

    async fn delete(&self, id: SessionId) -> Result<(), SessionStoreError> {
        self.entries
            .write()
            .map_err(|_| Self::poisoned())?
            .remove(&id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionId>, SessionStoreError> {
        Ok(self
            .entries
            .read()
            .map_err(|_| Self::poisoned())?
            .keys()
            .copied()
            .collect())
    }
}
