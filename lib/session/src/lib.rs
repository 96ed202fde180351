//! Transport session supervision for the lead-intake platform.
//!
//! This crate provides:
//!
//! - **Transport**: The consumed messaging capability contract
//! - **Session Store**: Durable storage for transport credentials
//! - **Retry Policy**: Bounded exponential backoff
//! - **Session Manager**: Lifecycle of the single live transport session
//! - **Lifecycle Events**: Typed events for subscribers such as the event bridge

pub mod error;
pub mod event;
pub mod manager;
pub mod retry;
pub mod state;
pub mod store;
pub mod transport;

pub use error::{SessionError, SessionStoreError, TransportError};
pub use event::{DisconnectReason, LifecycleEvent};
pub use manager::{InboundMessages, SessionManager, StaleCleanup, StartOutcome, wait_for_state};
pub use retry::RetryPolicy;
pub use state::{SessionSnapshot, SessionState};
pub use store::{InMemorySessionStore, SessionStore};
pub use transport::{
    ConnectionState, Credentials, DeliveryReceipt, InboundMessage, MessageKind, Transport,
    TransportEvent, TransportEvents, normalize_recipient,
};
