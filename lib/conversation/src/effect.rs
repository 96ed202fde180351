//! Side effects decided by the conversation engine and their execution.
//!
//! The engine only decides. [`EffectRunner`] carries the decision out, one
//! step at a time: reply, then contact bookkeeping, then the tracker task.
//! Every step is best effort; a failure is logged and the next step still
//! runs.

use crate::contact::{ContactRecord, ContactRepository, ContactUpdate};
use crate::error::OutboxError;
use crate::tracker::{BoardRoute, CommentRef, TaskRef, TaskTracker};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// A message to send back to the contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub to: String,
    pub body: String,
}

/// A contact repository write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactOp {
    Create(ContactRecord),
    Update { phone: String, update: ContactUpdate },
}

/// A task to open on the tracker, with its first comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    pub name: String,
    pub route: BoardRoute,
    pub comment: String,
}

/// What handling one inbound message should cause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Effect {
    pub reply: Option<Reply>,
    pub contact: Option<ContactOp>,
    pub task: Option<TaskRequest>,
}

impl Effect {
    /// No reply and no side effect.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Just a reply.
    #[must_use]
    pub fn reply(to: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            reply: Some(Reply {
                to: to.into(),
                body: body.into(),
            }),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_contact(mut self, op: ContactOp) -> Self {
        self.contact = Some(op);
        self
    }

    #[must_use]
    pub fn with_task(mut self, task: TaskRequest) -> Self {
        self.task = Some(task);
        self
    }

    /// Returns true if nothing would happen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reply.is_none() && self.contact.is_none() && self.task.is_none()
    }
}

/// Where replies go.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send(&self, recipient: &str, body: &str) -> Result<(), OutboxError>;
}

/// Outcome of running an effect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectReport {
    pub replied: bool,
    pub contact_written: bool,
    pub task: Option<TaskRef>,
    pub comment: Option<CommentRef>,
}

/// Executes effects against the outbox, contact repository and tracker.
#[derive(Clone)]
pub struct EffectRunner {
    outbox: Arc<dyn Outbox>,
    contacts: Arc<dyn ContactRepository>,
    tracker: Arc<dyn TaskTracker>,
}

impl EffectRunner {
    #[must_use]
    pub fn new(
        outbox: Arc<dyn Outbox>,
        contacts: Arc<dyn ContactRepository>,
        tracker: Arc<dyn TaskTracker>,
    ) -> Self {
        Self {
            outbox,
            contacts,
            tracker,
        }
    }

    /// Runs every step of an effect, logging failures.
    pub async fn run(&self, effect: Effect) -> EffectReport {
        let mut report = EffectReport::default();

        if let Some(reply) = effect.reply {
            report.replied = self.send_reply(&reply).await;
        }
        if let Some(op) = effect.contact {
            report.contact_written = self.write_contact(op).await;
        }
        if let Some(task) = effect.task
            && let Some(task_ref) = self.open_task(&task).await
        {
            report.comment = self.comment(&task_ref, &task.comment).await;
            report.task = Some(task_ref);
        }

        report
    }

    async fn send_reply(&self, reply: &Reply) -> bool {
        match self.outbox.send(&reply.to, &reply.body).await {
            Ok(()) => {
                debug!(phone = %reply.to, "reply sent");
                true
            }
            Err(e) => {
                warn!(phone = %reply.to, error = %e, "failed to send reply");
                false
            }
        }
    }

    async fn write_contact(&self, op: ContactOp) -> bool {
        match op {
            ContactOp::Create(record) => {
                let phone = record.phone.clone();
                match self.contacts.create(record).await {
                    Ok(()) => {
                        info!(phone = %phone, "contact created");
                        true
                    }
                    Err(e) => {
                        warn!(phone = %phone, error = %e, "failed to create contact");
                        false
                    }
                }
            }
            ContactOp::Update { phone, update } => {
                match self.contacts.update_by_phone(&phone, update).await {
                    Ok(0) => {
                        warn!(phone = %phone, "contact update matched no record");
                        false
                    }
                    Ok(_) => {
                        debug!(phone = %phone, "contact updated");
                        true
                    }
                    Err(e) => {
                        warn!(phone = %phone, error = %e, "failed to update contact");
                        false
                    }
                }
            }
        }
    }

    #[instrument(skip(self, task), fields(name = %task.name, board_id = task.route.board_id))]
    async fn open_task(&self, task: &TaskRequest) -> Option<TaskRef> {
        match self.tracker.create_task(&task.name, &task.route).await {
            Ok(task_ref) => {
                info!(task = %task_ref, "tracker task created");
                Some(task_ref)
            }
            Err(e) => {
                warn!(error = %e, "failed to create tracker task; skipping comment");
                None
            }
        }
    }

    async fn comment(&self, task: &TaskRef, text: &str) -> Option<CommentRef> {
        match self.tracker.add_comment(task, text).await {
            Ok(comment) => Some(comment),
            Err(e) => {
                warn!(task = %task, error = %e, "failed to comment on tracker task");
                None
            }
        }
    }
}

impl std::fmt::Debug for EffectRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectRunner").finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::contact::{ContactStatus, InMemoryContactRepository};
    use crate::error::TrackerError;
    use std::sync::Mutex;

    /// Outbox that records replies, optionally failing.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingOutbox {
        pub(crate) sent: Arc<Mutex<Vec<(String, String)>>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl Outbox for RecordingOutbox {
        async fn send(&self, recipient: &str, body: &str) -> Result<(), OutboxError> {
            if self.fail {
                return Err(OutboxError::NotConnected);
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), body.to_string()));
            Ok(())
        }
    }

    /// Tracker that records calls, optionally failing task creation.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingTracker {
        pub(crate) tasks: Arc<Mutex<Vec<(String, BoardRoute)>>>,
        pub(crate) comments: Arc<Mutex<Vec<(TaskRef, String)>>>,
        pub(crate) fail_create: bool,
    }

    #[async_trait]
    impl TaskTracker for RecordingTracker {
        async fn create_task(
            &self,
            name: &str,
            route: &BoardRoute,
        ) -> Result<TaskRef, TrackerError> {
            if self.fail_create {
                return Err(TrackerError::RequestFailed {
                    reason: "timeout".to_string(),
                });
            }
            let mut tasks = self.tasks.lock().unwrap();
            tasks.push((name.to_string(), route.clone()));
            Ok(TaskRef(format!("task-{}", tasks.len())))
        }

        async fn add_comment(
            &self,
            task: &TaskRef,
            text: &str,
        ) -> Result<CommentRef, TrackerError> {
            let mut comments = self.comments.lock().unwrap();
            comments.push((task.clone(), text.to_string()));
            Ok(CommentRef(format!("comment-{}", comments.len())))
        }
    }

    const PHONE: &str = "5511999990000@c.us";

    fn task() -> TaskRequest {
        TaskRequest {
            name: "Ana - 5511999990000".to_string(),
            route: BoardRoute::new(891_902_277, "novo_grupo"),
            comment: "form".to_string(),
        }
    }

    fn runner(
        outbox: &RecordingOutbox,
        contacts: &InMemoryContactRepository,
        tracker: &RecordingTracker,
    ) -> EffectRunner {
        EffectRunner::new(
            Arc::new(outbox.clone()),
            Arc::new(contacts.clone()),
            Arc::new(tracker.clone()),
        )
    }

    #[tokio::test]
    async fn runs_every_step() {
        let outbox = RecordingOutbox::default();
        let contacts = InMemoryContactRepository::new();
        contacts
            .create(ContactRecord::first_contact(PHONE, "Ana"))
            .await
            .unwrap();
        let tracker = RecordingTracker::default();

        let effect = Effect::reply(PHONE, "thanks")
            .with_contact(ContactOp::Update {
                phone: PHONE.to_string(),
                update: ContactUpdate::new().with_status(ContactStatus::AwaitingTask),
            })
            .with_task(task());
        let report = runner(&outbox, &contacts, &tracker).run(effect).await;

        assert!(report.replied);
        assert!(report.contact_written);
        assert_eq!(report.task, Some(TaskRef("task-1".to_string())));
        assert_eq!(report.comment, Some(CommentRef("comment-1".to_string())));
        assert_eq!(outbox.sent.lock().unwrap().len(), 1);
        assert_eq!(
            tracker.comments.lock().unwrap()[0],
            (TaskRef("task-1".to_string()), "form".to_string())
        );
    }

    #[tokio::test]
    async fn failed_reply_does_not_stop_bookkeeping() {
        let outbox = RecordingOutbox {
            fail: true,
            ..RecordingOutbox::default()
        };
        let contacts = InMemoryContactRepository::new();
        let tracker = RecordingTracker::default();

        let effect = Effect::reply(PHONE, "hello")
            .with_contact(ContactOp::Create(ContactRecord::first_contact(PHONE, "Ana")));
        let report = runner(&outbox, &contacts, &tracker).run(effect).await;

        assert!(!report.replied);
        assert!(report.contact_written);
        assert!(contacts.get(PHONE).is_some());
    }

    #[tokio::test]
    async fn failed_task_skips_comment() {
        let outbox = RecordingOutbox::default();
        let contacts = InMemoryContactRepository::new();
        let tracker = RecordingTracker {
            fail_create: true,
            ..RecordingTracker::default()
        };

        let report = runner(&outbox, &contacts, &tracker)
            .run(Effect::reply(PHONE, "thanks").with_task(task()))
            .await;

        assert!(report.replied);
        assert!(report.task.is_none());
        assert!(tracker.comments.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_without_match_is_reported() {
        let outbox = RecordingOutbox::default();
        let contacts = InMemoryContactRepository::new();
        let tracker = RecordingTracker::default();

        let report = runner(&outbox, &contacts, &tracker)
            .run(Effect::none().with_contact(ContactOp::Update {
                phone: PHONE.to_string(),
                update: ContactUpdate::new().with_form("x"),
            }))
            .await;

        assert!(!report.contact_written);
    }

    #[test]
    fn empty_effect() {
        assert!(Effect::none().is_empty());
        assert!(!Effect::reply(PHONE, "hi").is_empty());
    }
}
