//! Per-phone conversation state.
//!
//! Each phone has its own gate. Holding a [`PhoneGuard`] is the only way to
//! read or write that phone's state, so a read-modify-write of one phone is
//! atomic while different phones proceed in parallel. Entries with no state
//! and nobody waiting are dropped when the last guard is released.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Step of the intake dialogue a contact is at.
///
/// A phone with no state at all is new.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Menu sent; waiting for a service choice.
    AwaitingOption,
    /// Service chosen; waiting for the form.
    AwaitingForm,
    /// The contact already completed intake; messages are absorbed.
    DuplicateContact,
}

/// A contact's progress through the intake dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub stage: Stage,
    /// Set whenever `stage` is `AwaitingForm`.
    pub selected_service: Option<String>,
}

impl ConversationState {
    #[must_use]
    pub fn awaiting_option() -> Self {
        Self {
            stage: Stage::AwaitingOption,
            selected_service: None,
        }
    }

    #[must_use]
    pub fn awaiting_form(service: impl Into<String>) -> Self {
        Self {
            stage: Stage::AwaitingForm,
            selected_service: Some(service.into()),
        }
    }

    #[must_use]
    pub fn duplicate() -> Self {
        Self {
            stage: Stage::DuplicateContact,
            selected_service: None,
        }
    }
}

type Entry = Arc<AsyncMutex<Option<ConversationState>>>;

/// Conversation state of every phone, gated per phone.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to a phone's state.
    pub async fn lock(&self, phone: &str) -> PhoneGuard {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(entries.entry(phone.to_string()).or_default())
        };

        PhoneGuard {
            guard: entry.lock_owned().await,
            phone: phone.to_string(),
            entries: Arc::clone(&self.entries),
        }
    }

    /// Returns a copy of a phone's state, waiting for any in-flight handling.
    pub async fn get(&self, phone: &str) -> Option<ConversationState> {
        self.lock(phone).await.clone()
    }

    /// Number of phones with state or in-flight handling.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to one phone's state.
#[derive(Debug)]
pub struct PhoneGuard {
    guard: OwnedMutexGuard<Option<ConversationState>>,
    phone: String,
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl PhoneGuard {
    /// The phone this guard covers.
    #[must_use]
    pub fn phone(&self) -> &str {
        &self.phone
    }
}

impl Deref for PhoneGuard {
    type Target = Option<ConversationState>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for PhoneGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl Drop for PhoneGuard {
    fn drop(&mut self) {
        if self.guard.is_some() {
            return;
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        // With the map locked nobody can pick up a new handle. Two handles
        // (the map's and ours) means nobody is waiting on this entry.
        let ours = OwnedMutexGuard::mutex(&self.guard);
        let idle = entries
            .get(&self.phone)
            .is_some_and(|entry| Arc::ptr_eq(entry, ours) && Arc::strong_count(entry) == 2);
        if idle {
            entries.remove(&self.phone);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const PHONE: &str = "5511999990000@c.us";

    #[tokio::test]
    async fn state_persists_between_guards() {
        let store = ConversationStore::new();
        {
            let mut guard = store.lock(PHONE).await;
            assert!(guard.is_none());
            *guard = Some(ConversationState::awaiting_option());
        }

        assert_eq!(
            store.get(PHONE).await,
            Some(ConversationState::awaiting_option())
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn cleared_entries_are_dropped() {
        let store = ConversationStore::new();
        {
            let mut guard = store.lock(PHONE).await;
            *guard = Some(ConversationState::awaiting_form("GPR"));
        }
        {
            let mut guard = store.lock(PHONE).await;
            *guard = None;
        }

        assert!(store.is_empty());
        assert!(store.get(PHONE).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn same_phone_is_serialized() {
        let store = ConversationStore::new();
        let guard = store.lock(PHONE).await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut guard = store.lock(PHONE).await;
                *guard = Some(ConversationState::duplicate());
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert_eq!(store.get(PHONE).await, Some(ConversationState::duplicate()));
    }

    #[tokio::test]
    async fn waiting_contender_keeps_entry_alive() {
        let store = ConversationStore::new();
        let guard = store.lock(PHONE).await;

        let contender = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut guard = store.lock(PHONE).await;
                *guard = Some(ConversationState::awaiting_option());
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Released with no state while someone waits: the entry must survive.
        drop(guard);
        contender.await.unwrap();
        assert_eq!(
            store.get(PHONE).await,
            Some(ConversationState::awaiting_option())
        );
    }

    #[tokio::test]
    async fn different_phones_do_not_block() {
        let store = ConversationStore::new();
        let _first = store.lock(PHONE).await;

        let second = tokio::time::timeout(
            Duration::from_millis(50),
            store.lock("5511888880000@c.us"),
        )
        .await;
        assert!(second.is_ok());
    }
}
