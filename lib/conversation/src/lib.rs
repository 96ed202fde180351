//! Lead intake conversations for the lead-intake platform.
//!
//! This crate provides:
//!
//! - **Contacts**: Contact records and the repository contract
//! - **Task Tracker**: The contract for handing qualified leads downstream
//! - **Intake Script**: Options, routes, form fields and reply texts
//! - **Conversation Engine**: The per-phone intake state machine
//! - **Effects**: Side-effect descriptors and their best-effort execution
//! - **Dispatcher**: Per-phone ordered message handling

pub mod contact;
pub mod dispatch;
pub mod effect;
pub mod engine;
pub mod error;
pub mod script;
pub mod state;
pub mod tracker;

pub use contact::{
    ContactRecord, ContactRepository, ContactStatus, ContactUpdate, InMemoryContactRepository,
};
pub use dispatch::{Dispatcher, Incoming};
pub use effect::{ContactOp, Effect, EffectReport, EffectRunner, Outbox, Reply, TaskRequest};
pub use engine::ConversationEngine;
pub use error::{ContactError, OutboxError, TrackerError};
pub use script::IntakeScript;
pub use state::{ConversationState, ConversationStore, PhoneGuard, Stage};
pub use tracker::{BoardRoute, CommentRef, TaskRef, TaskTracker};
