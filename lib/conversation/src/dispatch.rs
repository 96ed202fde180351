//! Per-phone ordered dispatch of inbound messages.
//!
//! Every phone gets a lane: a task with its own queue. A lane handles its
//! messages strictly in arrival order and runs each effect to completion
//! before taking the next message. Lanes for different phones run in
//! parallel. A lane that stays idle retires itself.

use crate::effect::EffectRunner;
use crate::engine::ConversationEngine;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default time a lane waits for another message before retiring.
pub const DEFAULT_LANE_IDLE: Duration = Duration::from_secs(300);

/// An inbound message handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub sender: String,
    pub body: String,
    pub display_name: Option<String>,
}

impl Incoming {
    #[must_use]
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            display_name: None,
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

type Lanes = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<Incoming>>>>;

/// Routes inbound messages into per-phone lanes.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<ConversationEngine>,
    runner: EffectRunner,
    lanes: Lanes,
    idle: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(engine: Arc<ConversationEngine>, runner: EffectRunner) -> Self {
        Self {
            engine,
            runner,
            lanes: Arc::default(),
            idle: DEFAULT_LANE_IDLE,
        }
    }

    /// Sets how long an idle lane lingers.
    #[must_use]
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Queues a message on its sender's lane, opening the lane if needed.
    pub fn submit(&self, message: Incoming) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);

        // Lanes only retire under this lock, so a live sender stays live
        // until we release it.
        let message = match lanes.get(&message.sender) {
            Some(lane) => match lane.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let sender = message.sender.clone();
        if tx.send(message).is_err() {
            return;
        }
        lanes.insert(sender.clone(), tx);
        debug!(phone = %sender, "lane opened");
        tokio::spawn(self.clone().lane(sender, rx));
    }

    /// Number of open lanes.
    #[must_use]
    pub fn lane_count(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    async fn lane(self, phone: String, mut rx: mpsc::UnboundedReceiver<Incoming>) {
        loop {
            match tokio::time::timeout(self.idle, rx.recv()).await {
                Ok(Some(message)) => self.process(message).await,
                Ok(None) => break,
                Err(_) => {
                    if self.retire(&phone, &rx) {
                        break;
                    }
                }
            }
        }
        debug!(phone = %phone, "lane closed");
    }

    /// Drops an idle lane from the table unless a message arrived after the
    /// idle timeout fired.
    fn retire(&self, phone: &str, rx: &mpsc::UnboundedReceiver<Incoming>) -> bool {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if !rx.is_empty() {
            return false;
        }
        lanes.remove(phone);
        true
    }

    async fn process(&self, message: Incoming) {
        let effect = self
            .engine
            .handle_message(&message.sender, &message.body, message.display_name.as_deref())
            .await;
        let report = self.runner.run(effect).await;
        if report.task.is_some() && report.comment.is_none() {
            warn!(phone = %message.sender, "tracker task created without its comment");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("lanes", &self.lane_count())
            .field("idle", &self.idle)
            .finish_non_exhaustive()
    }
}
