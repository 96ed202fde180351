//! NATS connection and naming configuration.

use lead_intake_core::SessionId;
use serde::Deserialize;

/// Default subject prefix.
pub const DEFAULT_SUBJECT_PREFIX: &str = "intake";

/// Default bucket for transport session credentials.
pub const DEFAULT_SESSIONS_BUCKET: &str = "intake-sessions";

/// Default bucket for contact records.
pub const DEFAULT_CONTACTS_BUCKET: &str = "intake-contacts";

/// Configuration for the NATS adapters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Prefix of every subject (defaults to `intake`).
    #[serde(default)]
    pub subject_prefix: Option<String>,
    /// Bucket for session credentials (defaults to `intake-sessions`).
    #[serde(default, rename = "sessions_bucket")]
    pub sessions_bucket_name: Option<String>,
    /// Bucket for contacts (defaults to `intake-contacts`).
    #[serde(default, rename = "contacts_bucket")]
    pub contacts_bucket_name: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            subject_prefix: None,
            sessions_bucket_name: None,
            contacts_bucket_name: None,
        }
    }

    #[must_use]
    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = Some(prefix.into());
        self
    }

    #[must_use]
    pub fn with_sessions_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.sessions_bucket_name = Some(bucket.into());
        self
    }

    #[must_use]
    pub fn with_contacts_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.contacts_bucket_name = Some(bucket.into());
        self
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        self.subject_prefix
            .as_deref()
            .unwrap_or(DEFAULT_SUBJECT_PREFIX)
    }

    #[must_use]
    pub fn sessions_bucket(&self) -> &str {
        self.sessions_bucket_name
            .as_deref()
            .unwrap_or(DEFAULT_SESSIONS_BUCKET)
    }

    #[must_use]
    pub fn contacts_bucket(&self) -> &str {
        self.contacts_bucket_name
            .as_deref()
            .unwrap_or(DEFAULT_CONTACTS_BUCKET)
    }

    /// Subject of a gateway request, e.g. `intake.gateway.send`.
    #[must_use]
    pub fn gateway_subject(&self, verb: &str) -> String {
        format!("{}.gateway.{verb}", self.prefix())
    }

    /// Subject a session's transport events arrive on.
    #[must_use]
    pub fn session_events_subject(&self, session_id: SessionId) -> String {
        format!("{}.session.{session_id}.events", self.prefix())
    }

    /// Subject a lifecycle notification is published on.
    #[must_use]
    pub fn notification_subject(&self, event: &str) -> String {
        format!("{}.events.{event}", self.prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = NatsConfig::new("nats://localhost:4222");
        assert_eq!(config.prefix(), "intake");
        assert_eq!(config.sessions_bucket(), "intake-sessions");
        assert_eq!(config.contacts_bucket(), "intake-contacts");
    }

    #[test]
    fn subjects_use_prefix() {
        let config = NatsConfig::new("nats://localhost:4222").with_subject_prefix("geoview");
        assert_eq!(config.gateway_subject("connect"), "geoview.gateway.connect");
        assert_eq!(config.notification_subject("qr"), "geoview.events.qr");

        let id = SessionId::new();
        assert_eq!(
            config.session_events_subject(id),
            format!("geoview.session.{id}.events")
        );
    }

    #[test]
    fn deserializes_bucket_names() {
        let config: NatsConfig = serde_json::from_str(
            r#"{"url":"nats://nats:4222","sessions_bucket":"geo-sessions"}"#,
        )
        .unwrap();
        assert_eq!(config.sessions_bucket(), "geo-sessions");
        assert_eq!(config.contacts_bucket(), "intake-contacts");
        assert_eq!(config.prefix(), "intake");
    }
}
