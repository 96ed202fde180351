//! The task tracker contract.
//!
//! Qualified leads become tasks on a tracker board. Each selectable service
//! routes to its own board and group.

use crate::error::TrackerError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where tasks for a service are created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRoute {
    pub board_id: u64,
    pub group_id: String,
}

impl BoardRoute {
    #[must_use]
    pub fn new(board_id: u64, group_id: impl Into<String>) -> Self {
        Self {
            board_id,
            group_id: group_id.into(),
        }
    }
}

/// Reference to a created task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskRef(pub String);

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a created comment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentRef(pub String);

impl fmt::Display for CommentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A downstream task tracker.
#[async_trait]
pub trait TaskTracker: Send + Sync {
    /// Creates a task in the given board group.
    async fn create_task(&self, name: &str, route: &BoardRoute) -> Result<TaskRef, TrackerError>;

    /// Adds a comment to a task.
    async fn add_comment(&self, task: &TaskRef, text: &str) -> Result<CommentRef, TrackerError>;
}
