//! NATS adapters for the lead-intake platform.
//!
//! - `NatsTransport`: the messaging transport, reached through a gateway
//!   sidecar over request/reply
//! - `NatsSessionStore` / `NatsContactRepository`: JetStream KV storage
//! - `NatsNotifier`: lifecycle notifications as plain NATS messages
//!
//! Everything written to NATS is wrapped in a versioned [`Envelope`].

pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod kv;
pub mod notifier;

pub use config::NatsConfig;
pub use envelope::{CURRENT_VERSION, Envelope, EnvelopeError};
pub use error::NatsError;
pub use gateway::NatsTransport;
pub use kv::{NatsContactRepository, NatsSessionStore};
pub use notifier::NatsNotifier;

/// Connects to NATS and opens the JetStream context.
///
/// # Errors
///
/// Returns an error if the server cannot be reached.
pub async fn connect(
    config: &NatsConfig,
) -> Result<(async_nats::Client, async_nats::jetstream::Context), NatsError> {
    let client = async_nats::connect(&config.url)
        .await
        .map_err(|e| NatsError::ConnectionFailed {
            url: config.url.clone(),
            reason: e.to_string(),
        })?;
    let jetstream = async_nats::jetstream::new(client.clone());
    Ok((client, jetstream))
}
