//! The intake conversation state machine.

use crate::contact::{ContactRecord, ContactRepository, ContactStatus, ContactUpdate};
use crate::effect::{ContactOp, Effect, TaskRequest};
use crate::script::IntakeScript;
use crate::state::{ConversationState, ConversationStore, Stage};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Drives each phone through the intake dialogue.
///
/// Handling a message decides the reply and side effects and moves the
/// phone's state forward; it never performs the side effects itself.
pub struct ConversationEngine {
    contacts: Arc<dyn ContactRepository>,
    script: Arc<IntakeScript>,
    states: ConversationStore,
}

impl ConversationEngine {
    #[must_use]
    pub fn new(contacts: Arc<dyn ContactRepository>, script: IntakeScript) -> Self {
        Self {
            contacts,
            script: Arc::new(script),
            states: ConversationStore::new(),
        }
    }

    #[must_use]
    pub fn script(&self) -> &IntakeScript {
        &self.script
    }

    /// Per-phone conversation state.
    #[must_use]
    pub fn states(&self) -> &ConversationStore {
        &self.states
    }

    /// Handles one inbound message from `sender`.
    ///
    /// Messages from the same sender are handled one at a time, in the order
    /// they acquire the sender's gate. The contact lookup for a phone without
    /// state happens before the gate is taken.
    #[instrument(skip(self, body, display_name), fields(phone = %sender))]
    pub async fn handle_message(
        &self,
        sender: &str,
        body: &str,
        display_name: Option<&str>,
    ) -> Effect {
        let mut looked_up: Option<Option<ConversationState>> = None;
        let (mut state, current) = loop {
            let mut state = self.states.lock(sender).await;
            if let Some(current) = state.take() {
                break (state, Some(current));
            }
            if let Some(recovered) = looked_up.take() {
                break (state, recovered);
            }
            // The lookup runs without the gate; a handler that got in
            // meanwhile wins on the next pass.
            drop(state);
            looked_up = Some(self.reconcile(sender).await);
        };

        let Some(current) = current else {
            *state = Some(ConversationState::awaiting_option());
            info!("new contact greeted");
            return self.greet(sender, display_name);
        };

        let (next, effect) = self.step(sender, body, display_name, current);
        debug!(stage = ?next.as_ref().map(|s| s.stage), "conversation advanced");
        *state = next;
        effect
    }

    /// Recovers a phone's stage from its stored contact.
    ///
    /// Returns `None` for unknown contacts. A failed lookup counts as unknown.
    async fn reconcile(&self, phone: &str) -> Option<ConversationState> {
        let contact = match self.contacts.find_by_phone(phone).await {
            Ok(contact) => contact?,
            Err(e) => {
                warn!(error = %e, "contact lookup failed; treating as new contact");
                return None;
            }
        };

        let state = match (contact.service(), contact.form()) {
            (None, _) => ConversationState::awaiting_option(),
            (Some(service), None) => ConversationState::awaiting_form(service),
            (Some(_), Some(_)) => ConversationState::duplicate(),
        };
        debug!(stage = ?state.stage, "stage recovered from contact record");
        Some(state)
    }

    fn greet(&self, phone: &str, display_name: Option<&str>) -> Effect {
        let name = display_name.map(str::trim).unwrap_or_default();
        Effect::reply(phone, self.script.greeting())
            .with_contact(ContactOp::Create(ContactRecord::first_contact(phone, name)))
    }

    fn step(
        &self,
        phone: &str,
        body: &str,
        display_name: Option<&str>,
        current: ConversationState,
    ) -> (Option<ConversationState>, Effect) {
        match (current.stage, current.selected_service) {
            (Stage::AwaitingOption, _) => self.choose_option(phone, body),
            (Stage::AwaitingForm, Some(service)) => {
                self.submit_form(phone, body, display_name, service)
            }
            (Stage::AwaitingForm, None) => {
                warn!("awaiting form without a selected service; asking again");
                (
                    Some(ConversationState::awaiting_option()),
                    Effect::reply(phone, self.script.greeting()),
                )
            }
            (Stage::DuplicateContact, _) => (Some(ConversationState::duplicate()), Effect::none()),
        }
    }

    fn choose_option(&self, phone: &str, body: &str) -> (Option<ConversationState>, Effect) {
        let Some(service) = self.script.resolve_option(body) else {
            debug!("invalid option");
            return (
                Some(ConversationState::awaiting_option()),
                Effect::reply(phone, self.script.invalid_option()),
            );
        };

        info!(service, "service selected");
        let effect = Effect::reply(phone, self.script.form_request(service)).with_contact(
            ContactOp::Update {
                phone: phone.to_string(),
                update: ContactUpdate::new()
                    .with_service(service)
                    .with_status(ContactStatus::AwaitingForm),
            },
        );
        (Some(ConversationState::awaiting_form(service)), effect)
    }

    fn submit_form(
        &self,
        phone: &str,
        body: &str,
        display_name: Option<&str>,
        service: String,
    ) -> (Option<ConversationState>, Effect) {
        if !self.script.is_form_complete(body) {
            debug!("form too short");
            return (
                Some(ConversationState::awaiting_form(service)),
                Effect::reply(phone, self.script.incomplete_form()),
            );
        }

        let form = body.trim();
        let mut effect = Effect::reply(phone, self.script.thanks()).with_contact(ContactOp::Update {
            phone: phone.to_string(),
            update: ContactUpdate::new()
                .with_form(form)
                .with_service(service.as_str())
                .with_status(ContactStatus::AwaitingTask),
        });

        match self.script.route_for(&service) {
            Some(route) => {
                let name = contact_label(phone, display_name);
                effect = effect.with_task(TaskRequest {
                    name: name.clone(),
                    route: route.clone(),
                    comment: task_comment(&name, phone, &service, form),
                });
            }
            None => warn!(service = %service, "no tracker board for service; task skipped"),
        }

        info!(service = %service, "form received");
        (None, effect)
    }
}

impl std::fmt::Debug for ConversationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationEngine")
            .field("script", &self.script)
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

fn bare_phone(phone: &str) -> &str {
    phone.split('@').next().unwrap_or(phone)
}

fn contact_label(phone: &str, display_name: Option<&str>) -> String {
    let phone = bare_phone(phone);
    match display_name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{name} - {phone}"),
        None => phone.to_string(),
    }
}

fn task_comment(name: &str, phone: &str, service: &str, form: &str) -> String {
    format!(
        "Contato: {name}\nTelefone: {}\nServiço: {service}\n\n{form}",
        bare_phone(phone)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::InMemoryContactRepository;
    use crate::effect::EffectRunner;
    use crate::effect::tests::{RecordingOutbox, RecordingTracker};
    use crate::error::ContactError;
    use crate::tracker::BoardRoute;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    const PHONE: &str = "5511999990000@c.us";
    const FORM: &str = "Tipo: GPR\nNome: Ana Souza\nEmpresa: Geo Ltda\nEmail: ana@geo.com\nLocal: Campinas";

    fn engine(contacts: &InMemoryContactRepository) -> ConversationEngine {
        ConversationEngine::new(Arc::new(contacts.clone()), IntakeScript::default())
    }

    fn reply_body(effect: &Effect) -> &str {
        effect.reply.as_ref().map(|r| r.body.as_str()).unwrap_or("")
    }

    async fn seed(
        contacts: &InMemoryContactRepository,
        service: Option<&str>,
        form: Option<&str>,
    ) {
        let mut record = ContactRecord::first_contact(PHONE, "Ana");
        record.service = service.map(str::to_string);
        record.form = form.map(str::to_string);
        contacts.create(record).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_contact_is_greeted_with_menu() {
        let contacts = InMemoryContactRepository::new();
        let engine = engine(&contacts);

        let effect = engine.handle_message(PHONE, "hello", Some("Ana")).await;

        assert!(reply_body(&effect).contains("1 - GPR"));
        assert!(reply_body(&effect).contains("9 - Licitação"));
        match effect.contact {
            Some(ContactOp::Create(record)) => {
                assert_eq!(record.phone, PHONE);
                assert_eq!(record.whatsapp_name, "Ana");
                assert_eq!(record.status, ContactStatus::FirstContact);
            }
            other => panic!("expected contact creation, got {other:?}"),
        }
        assert!(effect.task.is_none());
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_option())
        );
    }

    #[tokio::test]
    async fn option_index_selects_service() {
        let contacts = InMemoryContactRepository::new();
        let engine = engine(&contacts);
        engine.handle_message(PHONE, "hello", None).await;

        let effect = engine.handle_message(PHONE, "1", None).await;

        assert!(reply_body(&effect).contains("*GPR*"));
        assert!(reply_body(&effect).contains("1. Tipo de serviço:"));
        assert_eq!(
            effect.contact,
            Some(ContactOp::Update {
                phone: PHONE.to_string(),
                update: ContactUpdate::new()
                    .with_service("GPR")
                    .with_status(ContactStatus::AwaitingForm),
            })
        );
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_form("GPR"))
        );
    }

    #[tokio::test]
    async fn option_label_selects_service() {
        let contacts = InMemoryContactRepository::new();
        let engine = engine(&contacts);
        engine.handle_message(PHONE, "hello", None).await;

        engine.handle_message(PHONE, "Geoelétrica", None).await;

        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_form("Geoelétrica"))
        );
    }

    #[tokio::test]
    async fn invalid_option_reprompts() {
        let contacts = InMemoryContactRepository::new();
        let engine = engine(&contacts);
        engine.handle_message(PHONE, "hello", None).await;

        for attempt in ["42", "geoelétrica", "quero um orçamento"] {
            let effect = engine.handle_message(PHONE, attempt, None).await;
            assert!(reply_body(&effect).starts_with("Opção inválida"));
            assert!(effect.contact.is_none());
        }
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_option())
        );
    }

    #[tokio::test]
    async fn short_form_is_rejected() {
        let contacts = InMemoryContactRepository::new();
        let engine = engine(&contacts);
        engine.handle_message(PHONE, "hello", None).await;
        engine.handle_message(PHONE, "1", None).await;

        let effect = engine.handle_message(PHONE, &"x".repeat(40), None).await;

        assert!(reply_body(&effect).contains("incompleta"));
        assert!(effect.contact.is_none());
        assert!(effect.task.is_none());
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_form("GPR"))
        );
    }

    #[tokio::test]
    async fn complete_form_hands_off_and_clears_state() {
        let contacts = InMemoryContactRepository::new();
        let engine = engine(&contacts);
        engine.handle_message(PHONE, "hello", Some("Ana")).await;
        engine.handle_message(PHONE, "1", Some("Ana")).await;

        let effect = engine
            .handle_message(PHONE, &format!("  {FORM}  "), Some("Ana"))
            .await;

        assert!(reply_body(&effect).contains("Obrigado"));
        assert_eq!(
            effect.contact,
            Some(ContactOp::Update {
                phone: PHONE.to_string(),
                update: ContactUpdate::new()
                    .with_form(FORM)
                    .with_service("GPR")
                    .with_status(ContactStatus::AwaitingTask),
            })
        );
        let task = effect.task.expect("task requested");
        assert_eq!(task.name, "Ana - 5511999990000");
        assert_eq!(task.route, BoardRoute::new(891_902_277, "novo_grupo"));
        assert!(task.comment.contains("Serviço: GPR"));
        assert!(task.comment.ends_with(FORM));
        assert!(engine.states().get(PHONE).await.is_none());
        assert!(engine.states().is_empty());
    }

    #[tokio::test]
    async fn completed_contact_is_absorbed() {
        let contacts = InMemoryContactRepository::new();
        seed(&contacts, Some("GPR"), Some(FORM)).await;
        let before = contacts.get(PHONE).unwrap();
        let engine = engine(&contacts);

        for body in ["hello", "1", FORM] {
            let effect = engine.handle_message(PHONE, body, None).await;
            assert!(effect.is_empty());
        }
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::duplicate())
        );
        assert_eq!(contacts.get(PHONE).unwrap(), before);
    }

    #[tokio::test]
    async fn contact_without_service_resumes_at_option() {
        let contacts = InMemoryContactRepository::new();
        seed(&contacts, None, None).await;
        let engine = engine(&contacts);

        // The same message is treated as the option reply.
        let effect = engine.handle_message(PHONE, "2", None).await;

        assert!(reply_body(&effect).contains("*Locação GPR_IE*"));
        assert!(matches!(effect.contact, Some(ContactOp::Update { .. })));
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_form("Locação GPR_IE"))
        );
    }

    #[tokio::test]
    async fn contact_without_form_resumes_at_form() {
        let contacts = InMemoryContactRepository::new();
        seed(&contacts, Some("Licitação"), None).await;
        let engine = engine(&contacts);

        let effect = engine.handle_message(PHONE, FORM, Some("Ana")).await;

        let task = effect.task.expect("task requested");
        assert_eq!(task.route, BoardRoute::new(4_810_781_529, "novo_grupo"));
        assert!(engine.states().get(PHONE).await.is_none());
    }

    #[tokio::test]
    async fn service_without_route_skips_task() {
        let contacts = InMemoryContactRepository::new();
        let mut script = IntakeScript::default();
        script.routes.remove("GPR");
        let engine = ConversationEngine::new(Arc::new(contacts.clone()), script);
        engine.handle_message(PHONE, "hello", None).await;
        engine.handle_message(PHONE, "1", None).await;

        let effect = engine.handle_message(PHONE, FORM, None).await;

        assert!(effect.reply.is_some());
        assert!(effect.contact.is_some());
        assert!(effect.task.is_none());
    }

    struct BrokenContacts;

    #[async_trait]
    impl ContactRepository for BrokenContacts {
        async fn find_by_phone(&self, _: &str) -> Result<Option<ContactRecord>, ContactError> {
            Err(ContactError::StorageFailed {
                reason: "connection refused".to_string(),
            })
        }

        async fn create(&self, _: ContactRecord) -> Result<(), ContactError> {
            Err(ContactError::StorageFailed {
                reason: "connection refused".to_string(),
            })
        }

        async fn update_by_phone(&self, _: &str, _: ContactUpdate) -> Result<u64, ContactError> {
            Ok(0)
        }

        async fn list_all(&self) -> Result<Vec<ContactRecord>, ContactError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn lookup_failure_treats_contact_as_new() {
        let engine = ConversationEngine::new(Arc::new(BrokenContacts), IntakeScript::default());

        let effect = engine.handle_message(PHONE, "hello", None).await;

        assert!(reply_body(&effect).contains("1 - GPR"));
        assert!(matches!(effect.contact, Some(ContactOp::Create(_))));
    }

    /// Lookups park until released.
    struct SlowContacts {
        inner: InMemoryContactRepository,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ContactRepository for SlowContacts {
        async fn find_by_phone(&self, phone: &str) -> Result<Option<ContactRecord>, ContactError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.find_by_phone(phone).await
        }

        async fn create(&self, record: ContactRecord) -> Result<(), ContactError> {
            self.inner.create(record).await
        }

        async fn update_by_phone(
            &self,
            phone: &str,
            update: ContactUpdate,
        ) -> Result<u64, ContactError> {
            self.inner.update_by_phone(phone, update).await
        }

        async fn list_all(&self) -> Result<Vec<ContactRecord>, ContactError> {
            self.inner.list_all().await
        }
    }

    #[tokio::test]
    async fn contact_lookup_does_not_hold_the_phone_gate() {
        let contacts = InMemoryContactRepository::new();
        seed(&contacts, Some("Licitação"), None).await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let engine = Arc::new(ConversationEngine::new(
            Arc::new(SlowContacts {
                inner: contacts.clone(),
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
            IntakeScript::default(),
        ));

        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.handle_message(PHONE, FORM, None).await })
        };
        entered.notified().await;

        let guard = tokio::time::timeout(Duration::from_secs(1), engine.states().lock(PHONE))
            .await
            .expect("gate free while the lookup is pending");
        drop(guard);
        release.notify_one();

        let effect = pending.await.unwrap();
        assert!(effect.task.is_some());
        assert!(engine.states().get(PHONE).await.is_none());
    }

    #[tokio::test]
    async fn state_set_during_lookup_wins() {
        let contacts = InMemoryContactRepository::new();
        seed(&contacts, Some("Licitação"), None).await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let engine = Arc::new(ConversationEngine::new(
            Arc::new(SlowContacts {
                inner: contacts.clone(),
                entered: Arc::clone(&entered),
                release: Arc::clone(&release),
            }),
            IntakeScript::default(),
        ));

        let pending = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.handle_message(PHONE, "3", None).await })
        };
        entered.notified().await;
        *engine.states().lock(PHONE).await = Some(ConversationState::awaiting_option());
        release.notify_one();

        let effect = pending.await.unwrap();
        assert!(reply_body(&effect).contains("1. Tipo de serviço:"));
        assert_eq!(
            engine.states().get(PHONE).await,
            Some(ConversationState::awaiting_form("Geoelétrica"))
        );
    }

    #[tokio::test]
    async fn concurrent_messages_from_one_phone_are_serialized() {
        let contacts = InMemoryContactRepository::new();
        let engine = Arc::new(engine(&contacts));
        engine.handle_message(PHONE, "hello", None).await;

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.handle_message(PHONE, "1", None).await })
            })
            .collect();
        let mut bodies = Vec::new();
        for handle in handles {
            bodies.push(reply_body(&handle.await.unwrap()).to_string());
        }

        let selected = bodies.iter().filter(|b| b.contains("*GPR*")).count();
        let incomplete = bodies.iter().filter(|b| b.contains("incompleta")).count();
        assert_eq!((selected, incomplete), (1, 1));
    }

    #[tokio::test]
    async fn full_intake_through_effect_runner() {
        let contacts = InMemoryContactRepository::new();
        let outbox = RecordingOutbox::default();
        let tracker = RecordingTracker::default();
        let engine = engine(&contacts);
        let runner = EffectRunner::new(
            Arc::new(outbox.clone()),
            Arc::new(contacts.clone()),
            Arc::new(tracker.clone()),
        );

        for body in ["oi", "5", FORM] {
            let effect = engine.handle_message(PHONE, body, Some("Ana")).await;
            runner.run(effect).await;
        }

        let record = contacts.get(PHONE).unwrap();
        assert_eq!(record.status, ContactStatus::AwaitingTask);
        assert_eq!(record.service(), Some("Geofísica Geral"));
        assert_eq!(record.form(), Some(FORM));
        assert_eq!(outbox.sent.lock().unwrap().len(), 3);
        assert_eq!(tracker.tasks.lock().unwrap().len(), 1);
        assert_eq!(tracker.comments.lock().unwrap().len(), 1);

        // Any later message is absorbed.
        let effect = engine.handle_message(PHONE, "oi de novo", None).await;
        assert!(effect.is_empty());
    }
}
