//! Error contexts for service operations.
//!
//! Library errors are wrapped with one of these via rootcause's `.context()`
//! so a report reads from the operation down to the failing collaborator.

use std::fmt;

/// The service operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    /// An administrative send did not go out.
    SendFailed,
    /// Stored sessions could not be inspected.
    SessionCleanupFailed,
    /// Contacts could not be listed.
    ContactsUnavailable,
    /// A collaborator could not be built at boot.
    StartupFailed { component: &'static str },
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SendFailed => write!(f, "failed to send message"),
            Self::SessionCleanupFailed => write!(f, "failed to clean up stored sessions"),
            Self::ContactsUnavailable => write!(f, "failed to list contacts"),
            Self::StartupFailed { component } => write!(f, "failed to start {component}"),
        }
    }
}

impl std::error::Error for ServiceError {}
