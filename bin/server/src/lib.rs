//! Lead intake agent.
//!
//! Wires the session supervisor, the conversation engine and the event
//! bridge to their NATS and Monday.com adapters.

pub mod config;
pub mod error;
pub mod outbox;
pub mod service;

pub use config::ServerConfig;
pub use error::ServiceError;
pub use service::{Adapters, IntakeService, Workers};
