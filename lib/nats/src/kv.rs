//! JetStream KV storage for session credentials and contacts.

use crate::envelope::Envelope;
use crate::error::NatsError;
use async_nats::jetstream;
use async_nats::jetstream::kv::{self, CreateErrorKind, Operation};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::TryStreamExt;
use lead_intake_conversation::{ContactError, ContactRecord, ContactRepository, ContactUpdate};
use lead_intake_core::SessionId;
use lead_intake_session::{Credentials, SessionStore, SessionStoreError};
use tracing::{debug, warn};

/// Attempts at a compare-and-set contact update before giving up.
const UPDATE_ATTEMPTS: usize = 3;

/// Opens a bucket, creating it if it does not exist yet.
async fn open_bucket(
    jetstream: &jetstream::Context,
    bucket: &str,
) -> Result<kv::Store, NatsError> {
    if let Ok(store) = jetstream.get_key_value(bucket).await {
        return Ok(store);
    }

    debug!(bucket, "creating KV bucket");
    jetstream
        .create_key_value(kv::Config {
            bucket: bucket.to_string(),
            history: 1,
            ..Default::default()
        })
        .await
        .map_err(|e| NatsError::BucketUnavailable {
            bucket: bucket.to_string(),
            reason: e.to_string(),
        })
}

/// Session credentials in a KV bucket, keyed by session id.
#[derive(Debug, Clone)]
pub struct NatsSessionStore {
    kv: kv::Store,
}

impl NatsSessionStore {
    /// Opens (or creates) the sessions bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be opened or created.
    pub async fn open(jetstream: &jetstream::Context, bucket: &str) -> Result<Self, NatsError> {
        Ok(Self {
            kv: open_bucket(jetstream, bucket).await?,
        })
    }
}

fn storage_failed(e: impl std::fmt::Display) -> SessionStoreError {
    SessionStoreError::StorageFailed {
        reason: e.to_string(),
    }
}

#[async_trait]
impl SessionStore for NatsSessionStore {
    async fn save(&self, id: SessionId, credentials: Credentials) -> Result<(), SessionStoreError> {
        let bytes = Envelope::seal(credentials).map_err(storage_failed)?;
        self.kv
            .put(id.to_string(), bytes.into())
            .await
            .map_err(storage_failed)?;
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Option<Credentials>, SessionStoreError> {
        let Some(bytes) = self.kv.get(id.to_string()).await.map_err(storage_failed)? else {
            return Ok(None);
        };
        Envelope::open(&bytes)
            .map(Some)
            .map_err(|e| SessionStoreError::Corrupted {
                id,
                reason: e.to_string(),
            })
    }

    async fn delete(&self, id: SessionId) -> Result<(), SessionStoreError> {
        self.kv
            .delete(id.to_string())
            .await
            .map_err(storage_failed)
    }

    async fn list(&self) -> Result<Vec<SessionId>, SessionStoreError> {
        let keys: Vec<String> = self
            .kv
            .keys()
            .await
            .map_err(storage_failed)?
            .try_collect()
            .await
            .map_err(storage_failed)?;

        Ok(keys
            .into_iter()
            .filter_map(|key| match key.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    warn!(key = %key, error = %e, "ignoring foreign key in sessions bucket");
                    None
                }
            })
            .collect())
    }
}

/// Key of a contact: URL-safe base64 of the phone, which may hold
/// characters KV keys do not allow.
fn contact_key(phone: &str) -> String {
    URL_SAFE_NO_PAD.encode(phone)
}

/// Contact records in a KV bucket.
#[derive(Debug, Clone)]
pub struct NatsContactRepository {
    kv: kv::Store,
}

impl NatsContactRepository {
    /// Opens (or creates) the contacts bucket.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket cannot be opened or created.
    pub async fn open(jetstream: &jetstream::Context, bucket: &str) -> Result<Self, NatsError> {
        Ok(Self {
            kv: open_bucket(jetstream, bucket).await?,
        })
    }
}

fn contact_storage_failed(e: impl std::fmt::Display) -> ContactError {
    ContactError::StorageFailed {
        reason: e.to_string(),
    }
}

fn decode_contact(phone: &str, bytes: &[u8]) -> Result<ContactRecord, ContactError> {
    Envelope::open(bytes).map_err(|e| ContactError::Corrupted {
        phone: phone.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl ContactRepository for NatsContactRepository {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<ContactRecord>, ContactError> {
        self.kv
            .get(contact_key(phone))
            .await
            .map_err(contact_storage_failed)?
            .map(|bytes| decode_contact(phone, &bytes))
            .transpose()
    }

    async fn create(&self, record: ContactRecord) -> Result<(), ContactError> {
        let bytes = Envelope::seal(&record).map_err(contact_storage_failed)?;
        match self.kv.create(contact_key(&record.phone), bytes.into()).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.kind(), CreateErrorKind::AlreadyExists) => {
                Err(ContactError::AlreadyExists {
                    phone: record.phone,
                })
            }
            Err(e) => Err(contact_storage_failed(e)),
        }
    }

    async fn update_by_phone(
        &self,
        phone: &str,
        update: ContactUpdate,
    ) -> Result<u64, ContactError> {
        let key = contact_key(phone);
        let mut last_error = None;

        for _ in 0..UPDATE_ATTEMPTS {
            let entry = self.kv.entry(key.clone()).await.map_err(contact_storage_failed)?;
            let Some(entry) = entry.filter(|e| matches!(e.operation, Operation::Put)) else {
                return Ok(0);
            };

            let mut record = decode_contact(phone, &entry.value)?;
            record.apply(&update);
            let bytes = Envelope::seal(&record).map_err(contact_storage_failed)?;

            match self.kv.update(&key, bytes.into(), entry.revision).await {
                Ok(_) => return Ok(1),
                Err(e) => {
                    debug!(phone, error = %e, "contact changed concurrently; retrying update");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(ContactError::StorageFailed {
            reason: last_error.unwrap_or_else(|| "update did not apply".to_string()),
        })
    }

    async fn list_all(&self) -> Result<Vec<ContactRecord>, ContactError> {
        let keys: Vec<String> = self
            .kv
            .keys()
            .await
            .map_err(contact_storage_failed)?
            .try_collect()
            .await
            .map_err(contact_storage_failed)?;

        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(bytes) = self.kv.get(key.clone()).await.map_err(contact_storage_failed)?
            else {
                continue;
            };
            match decode_contact(&key, &bytes) {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable contact"),
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
