//! Session lifecycle notifications for the lead-intake platform.
//!
//! The bridge listens to the session manager's lifecycle events and
//! republishes the ones operators care about (pairing payload, ready,
//! disconnected, authentication failure) on a notification channel.

pub mod bridge;
pub mod error;
pub mod notifier;

pub use bridge::EventBridge;
pub use error::NotifyError;
pub use notifier::Notifier;
