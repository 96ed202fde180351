//! Contact records and the repository contract.
//!
//! A contact is keyed by phone (the sender's transport address). Its
//! persisted `service` and `form` fields are the source of truth for where a
//! conversation stands; the in-memory conversation state only caches it.

use crate::error::ContactError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Where a contact is in the intake pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    /// Greeted; no service chosen yet.
    FirstContact,
    /// Service chosen; waiting for the form.
    AwaitingForm,
    /// Form received; waiting for a task to be handled downstream.
    AwaitingTask,
}

/// A stored contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Sender address, unique.
    pub phone: String,
    /// Display name the contact uses on the messaging network.
    pub whatsapp_name: String,
    /// Pipeline status.
    pub status: ContactStatus,
    /// Selected service, once chosen.
    #[serde(default)]
    pub service: Option<String>,
    /// Submitted form text, once received.
    #[serde(default)]
    pub form: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactRecord {
    /// Creates the record for a contact seen for the first time.
    #[must_use]
    pub fn first_contact(phone: impl Into<String>, whatsapp_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            phone: phone.into(),
            whatsapp_name: whatsapp_name.into(),
            status: ContactStatus::FirstContact,
            service: None,
            form: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The recorded service, ignoring blank values.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        non_blank(self.service.as_deref())
    }

    /// The recorded form, ignoring blank values.
    #[must_use]
    pub fn form(&self) -> Option<&str> {
        non_blank(self.form.as_deref())
    }

    /// Applies a partial update, touching `updated_at`.
    pub fn apply(&mut self, update: &ContactUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(service) = &update.service {
            self.service = Some(service.clone());
        }
        if let Some(form) = &update.form {
            self.form = Some(form.clone());
        }
        self.updated_at = Utc::now();
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// Partial update of a contact. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ContactStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<String>,
}

impl ContactUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: ContactStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the service.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Sets the form text.
    #[must_use]
    pub fn with_form(mut self, form: impl Into<String>) -> Self {
        self.form = Some(form.into());
        self
    }
}

/// Storage for contact records.
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Looks up a contact by phone.
    async fn find_by_phone(&self, phone: &str) -> Result<Option<ContactRecord>, ContactError>;

    /// Stores a new contact. Fails with `AlreadyExists` if the phone is taken.
    async fn create(&self, record: ContactRecord) -> Result<(), ContactError>;

    /// Applies a partial update, returning how many records matched.
    async fn update_by_phone(&self, phone: &str, update: ContactUpdate)
    -> Result<u64, ContactError>;

    /// Lists every contact.
    async fn list_all(&self) -> Result<Vec<ContactRecord>, ContactError>;
}

/// In-memory contact repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryContactRepository {
    records: Arc<RwLock<HashMap<String, ContactRecord>>>,
}

impl InMemoryContactRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of a stored record.
    #[must_use]
    pub fn get(&self, phone: &str) -> Option<ContactRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(phone)
            .cloned()
    }

    /// Returns the number of stored contacts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no contacts are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContactRepository for InMemoryContactRepository {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<ContactRecord>, ContactError> {
        Ok(self.get(phone))
    }

    async fn create(&self, record: ContactRecord) -> Result<(), ContactError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&record.phone) {
            return Err(ContactError::AlreadyExists {
                phone: record.phone,
            });
        }
        records.insert(record.phone.clone(), record);
        Ok(())
    }

    async fn update_by_phone(
        &self,
        phone: &str,
        update: ContactUpdate,
    ) -> Result<u64, ContactError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        match records.get_mut(phone) {
            Some(record) => {
                record.apply(&update);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn list_all(&self) -> Result<Vec<ContactRecord>, ContactError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}
