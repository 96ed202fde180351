//! Monday.com client configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Public Monday.com GraphQL endpoint.
pub const DEFAULT_API_URL: &str = "https://api.monday.com/v2";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for [`MondayTracker`](crate::MondayTracker).
#[derive(Clone, Serialize, Deserialize)]
pub struct MondayConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    pub api_token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl MondayConfig {
    /// Config for the public endpoint with the given API token.
    #[must_use]
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_url: default_api_url(),
            api_token: api_token.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// The token never ends up in logs.
impl fmt::Debug for MondayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MondayConfig")
            .field("api_url", &self.api_url)
            .field("api_token", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_public_endpoint() {
        let config = MondayConfig::new("secret");
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn deserializes_with_only_a_token() {
        let config: MondayConfig = serde_json::from_str(r#"{"api_token":"t"}"#).unwrap();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.timeout_secs, 10);
    }

    #[test]
    fn debug_hides_token() {
        let rendered = format!("{:?}", MondayConfig::new("secret-token"));
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn timeout_is_at_least_a_second() {
        let config = MondayConfig::new("t").with_timeout(Duration::from_millis(10));
        assert_eq!(config.timeout(), Duration::from_secs(1));
    }
}
