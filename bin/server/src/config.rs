//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, `__` separating
//! sections (`NATS__URL`, `TRACKER__API_TOKEN`, `RETRY__MAX_RETRIES`, ...).
//!
//! See [`NatsConfig`] and [`MondayConfig`] for the adapter sections.

use lead_intake_conversation::IntakeScript;
use lead_intake_integration::MondayConfig;
use lead_intake_nats::NatsConfig;
use lead_intake_session::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// NATS connection, subjects and buckets.
    pub nats: NatsConfig,

    /// Reconnect backoff.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Monday.com task tracker.
    pub tracker: MondayConfig,

    /// Intake dialogue settings.
    #[serde(default)]
    pub script: ScriptConfig,
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Automatic retries before the session is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds. Doubles per attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    5000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

/// Intake dialogue settings. Options and routes keep their built-in values.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptConfig {
    #[serde(default = "default_company_name")]
    pub company_name: String,

    /// Shortest form text, in characters, accepted as complete.
    #[serde(default = "default_min_form_length")]
    pub min_form_length: usize,
}

fn default_company_name() -> String {
    IntakeScript::default().company_name
}

fn default_min_form_length() -> usize {
    IntakeScript::default().min_form_length
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            company_name: default_company_name(),
            min_form_length: default_min_form_length(),
        }
    }
}

impl ScriptConfig {
    #[must_use]
    pub fn script(&self) -> IntakeScript {
        IntakeScript::default()
            .with_company_name(self.company_name.clone())
            .with_min_form_length(self.min_form_length)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
