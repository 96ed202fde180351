//! Core domain types and utilities for the lead-intake platform.
//!
//! This crate provides the foundational types and error handling shared by
//! the session supervisor, the conversation engine and the server binary.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{MessageId, ParseIdError, SessionId};
