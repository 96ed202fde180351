//! Lifecycle supervision of the single live transport session.
//!
//! The manager owns the session slot. Every transition happens under one
//! mutex that is never held across an `.await`; transport and store calls run
//! outside it and their results are applied back under it.
//!
//! Transport `connect` and `disconnect` calls are additionally serialized by
//! an async gate, so cleanup of a failed attempt always reaches the
//! transport before the next attempt connects.
//!
//! Each attempt gets an epoch. Transport events, retry timers and in-flight
//! connects carry the epoch they were started under and are ignored once the
//! slot has moved on, so a superseded attempt can never mutate current state.

use crate::error::SessionError;
use crate::event::{DisconnectReason, LifecycleEvent};
use crate::retry::RetryPolicy;
use crate::state::{SessionSnapshot, SessionState};
use crate::store::SessionStore;
use crate::transport::{
    ConnectionState, Credentials, DeliveryReceipt, InboundMessage, MessageKind, Transport,
    TransportEvent, TransportEvents,
};
use futures::future::BoxFuture;
use lead_intake_core::SessionId;
use rootcause::prelude::Report;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the lifecycle event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What `start_session` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new attempt was started under this id.
    Started(SessionId),
    /// An attempt is already in flight or connected; nothing happened.
    AlreadyActive,
    /// The attempt was torn down before the transport answered.
    Superseded(SessionId),
}

/// Result of the boot-time stale session sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaleCleanup {
    /// The newest stored session, kept as credential source.
    pub kept: Option<SessionId>,
    /// Older sessions that were deleted.
    pub deleted: Vec<SessionId>,
}

/// Receiving side of the inbound direct-message queue.
#[derive(Debug)]
pub struct InboundMessages {
    rx: mpsc::UnboundedReceiver<InboundMessage>,
}

impl InboundMessages {
    /// Waits for the next inbound direct message.
    ///
    /// Returns `None` once the session manager is gone.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Returns a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.rx.try_recv().ok()
    }
}

/// Why an attempt is being abandoned.
#[derive(Debug)]
enum FailureCause {
    Connect(String),
    Lost(String),
    AuthRejected(String),
    StreamClosed,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connect(reason) => write!(f, "connect failed: {reason}"),
            Self::Lost(reason) => write!(f, "connection lost: {reason}"),
            Self::AuthRejected(reason) => write!(f, "authentication rejected: {reason}"),
            Self::StreamClosed => write!(f, "transport event stream closed"),
        }
    }
}

/// How a deliberate stop treats stored credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    /// Forget the session and its credentials.
    Teardown,
    /// Keep the credentials for the next start.
    Shutdown,
}

#[derive(Debug, Default)]
struct Slot {
    session_id: Option<SessionId>,
    state: SessionState,
    retry_count: u32,
    last_qr: Option<String>,
    /// Guards against overlapping start sequences.
    starting: bool,
    epoch: u64,
    /// Session whose stored blob is handed to the next connect.
    credential_source: Option<SessionId>,
    retry_timer: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Slot {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id,
            state: self.state,
            retry_count: self.retry_count,
            last_qr: self.last_qr.clone(),
        }
    }
}

struct Inner {
    transport: Arc<dyn Transport>,
    store: Arc<dyn SessionStore>,
    policy: RetryPolicy,
    slot: Mutex<Slot>,
    transport_gate: AsyncMutex<()>,
    snapshot: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<LifecycleEvent>,
    inbound: mpsc::UnboundedSender<InboundMessage>,
}

/// Supervisor of the single live transport session.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Creates a manager and the queue inbound direct messages arrive on.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn SessionStore>,
        policy: RetryPolicy,
    ) -> (Self, InboundMessages) {
        let (inbound, rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let manager = Self {
            inner: Arc::new(Inner {
                transport,
                store,
                policy,
                slot: Mutex::new(Slot::default()),
                transport_gate: AsyncMutex::new(()),
                snapshot,
                events,
                inbound,
            }),
        };
        (manager, InboundMessages { rx })
    }

    /// Starts a session unless one is already starting or live.
    ///
    /// Transport failures are never returned; they feed the retry schedule
    /// and show up through [`state`](Self::state).
    pub async fn start_session(&self) -> StartOutcome {
        self.inner.start().await
    }

    /// Returns the current session snapshot.
    #[must_use]
    pub fn state(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Watches session snapshots as they change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    /// Tears the session down and forgets its stored credentials.
    ///
    /// Returns false, touching nothing, if the session is already idle.
    pub async fn teardown(&self) -> bool {
        self.inner.stop(Stop::Teardown).await
    }

    /// Disconnects the session but keeps its stored credentials, so the next
    /// process can resume without pairing again.
    ///
    /// Returns false, touching nothing, if the session is already idle.
    pub async fn shutdown(&self) -> bool {
        self.inner.stop(Stop::Shutdown).await
    }

    /// Resets the retry counter without changing the session state.
    pub fn reset_retry_counter(&self) {
        let mut slot = self.inner.lock();
        slot.retry_count = 0;
        self.inner.publish(&slot);
        info!("retry counter reset");
    }

    /// Sends a message through the connected session.
    ///
    /// # Errors
    ///
    /// Returns `NoActiveSession` if the session is not connected, or
    /// `DeliveryFailed` if the transport rejects the message.
    #[instrument(skip(self, body))]
    pub async fn send_message(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, Report<SessionError>> {
        if self.inner.lock().state != SessionState::Connected {
            return Err(SessionError::NoActiveSession.into());
        }

        let receipt = self
            .inner
            .transport
            .send_message(recipient, body)
            .await
            .map_err(|e| SessionError::DeliveryFailed {
                recipient: recipient.to_string(),
                reason: e.to_string(),
            })?;

        debug!(message_id = %receipt.id, "message accepted by transport");
        Ok(receipt)
    }

    /// Asks the transport for its own view of the connection.
    ///
    /// Reports `Disconnected` when no session is live or the query fails.
    pub async fn connection_state(&self) -> ConnectionState {
        if !self.inner.lock().state.is_active() {
            return ConnectionState::Disconnected;
        }

        match self.inner.transport.connection_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "failed to query transport connection state");
                ConnectionState::Disconnected
            }
        }
    }

    /// Returns true if stored credentials will be offered on the next start.
    #[must_use]
    pub fn has_stored_session(&self) -> bool {
        self.inner.lock().credential_source.is_some()
    }

    /// Deletes every stored session except the newest, which becomes the
    /// credential source for the next start.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored sessions cannot be listed. Individual
    /// delete failures are logged and skipped.
    #[instrument(skip(self))]
    pub async fn cleanup_stale_sessions(&self) -> Result<StaleCleanup, Report<SessionError>> {
        let mut ids = self
            .inner
            .store
            .list()
            .await
            .map_err(|e| SessionError::Storage {
                reason: e.to_string(),
            })?;
        ids.sort_unstable();

        let Some(newest) = ids.pop() else {
            debug!("no stored sessions");
            return Ok(StaleCleanup::default());
        };

        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inner.store.delete(id).await {
                Ok(()) => deleted.push(id),
                Err(e) => warn!(session_id = %id, error = %e, "failed to delete stale session"),
            }
        }

        {
            let mut slot = self.inner.lock();
            if slot.credential_source.is_none() {
                slot.credential_source = Some(newest);
            }
        }

        info!(kept = %newest, deleted = deleted.len(), "stale sessions cleaned up");
        Ok(StaleCleanup {
            kept: Some(newest),
            deleted,
        })
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, slot: &Slot) {
        self.snapshot.send_replace(slot.snapshot());
    }

    fn emit(&self, event: LifecycleEvent) {
        let name = event.name();
        if self.events.send(event).is_err() {
            debug!(event = name, "no lifecycle subscribers");
        }
    }

    async fn start(self: &Arc<Self>) -> StartOutcome {
        let (session_id, epoch, source) = {
            let mut slot = self.lock();
            if slot.starting || slot.state.is_active() {
                debug!(state = %slot.state, "session already starting or live");
                return StartOutcome::AlreadyActive;
            }

            slot.starting = true;
            slot.epoch += 1;
            if let Some(timer) = slot.retry_timer.take() {
                timer.abort();
            }
            if let Some(pump) = slot.pump.take() {
                pump.abort();
            }

            let session_id = SessionId::new();
            slot.session_id = Some(session_id);
            slot.state = SessionState::Initializing;
            slot.last_qr = None;
            self.publish(&slot);
            (session_id, slot.epoch, slot.credential_source)
        };

        let credentials = match source {
            Some(source) => self.load_credentials(source).await,
            None => None,
        };

        let gate = self.transport_gate.lock().await;
        if self.lock().epoch != epoch {
            debug!(session_id = %session_id, "attempt superseded before connecting");
            return StartOutcome::Superseded(session_id);
        }
        info!(
            session_id = %session_id,
            with_credentials = credentials.is_some(),
            "connecting transport session"
        );

        match self.transport.connect(session_id, credentials).await {
            Ok(events) => {
                {
                    let mut slot = self.lock();
                    if slot.epoch == epoch {
                        slot.starting = false;
                        let inner = Arc::clone(self);
                        slot.pump = Some(tokio::spawn(inner.pump(epoch, events)));
                        return StartOutcome::Started(session_id);
                    }
                }

                debug!(session_id = %session_id, "attempt superseded while connecting");
                if let Err(e) = self.transport.disconnect(session_id).await {
                    warn!(session_id = %session_id, error = %e, "failed to release superseded transport handle");
                }
                StartOutcome::Superseded(session_id)
            }
            Err(e) => {
                drop(gate);
                warn!(session_id = %session_id, error = %e, "transport connect failed");
                Arc::clone(self)
                    .handle_failure(epoch, FailureCause::Connect(e.to_string()))
                    .await;
                StartOutcome::Started(session_id)
            }
        }
    }

    async fn load_credentials(&self, source: SessionId) -> Option<Credentials> {
        match self.store.load(source).await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(session_id = %source, error = %e, "failed to load stored credentials");
                None
            }
        }
    }

    async fn pump(self: Arc<Self>, epoch: u64, mut events: TransportEvents) {
        while let Some(event) = events.recv().await {
            if self.lock().epoch != epoch {
                debug!("dropping event from superseded attempt");
                return;
            }
            self.on_event(epoch, event).await;
        }

        if self.lock().epoch == epoch {
            // The failure handler aborts this task, so it must run elsewhere.
            tokio::spawn(Arc::clone(&self).handle_failure(epoch, FailureCause::StreamClosed));
        }
    }

    async fn on_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::PairingPayload(payload) => {
                let session_id = {
                    let mut slot = self.lock();
                    let Some(session_id) = slot.session_id.filter(|_| slot.epoch == epoch) else {
                        return;
                    };
                    slot.state = SessionState::AwaitingPairing;
                    slot.last_qr = Some(payload.clone());
                    self.publish(&slot);
                    session_id
                };
                info!(session_id = %session_id, "pairing payload received");
                self.emit(LifecycleEvent::PairingPayload {
                    session_id,
                    payload,
                });
            }
            TransportEvent::Ready => {
                let session_id = {
                    let mut slot = self.lock();
                    let Some(session_id) = slot.session_id.filter(|_| slot.epoch == epoch) else {
                        return;
                    };
                    slot.state = SessionState::Connected;
                    slot.retry_count = 0;
                    slot.last_qr = None;
                    if let Some(timer) = slot.retry_timer.take() {
                        timer.abort();
                    }
                    self.publish(&slot);
                    session_id
                };
                info!(session_id = %session_id, "transport session connected");
                self.emit(LifecycleEvent::Ready { session_id });
            }
            TransportEvent::CredentialsSaved(credentials) => {
                self.persist_credentials(epoch, credentials).await;
            }
            TransportEvent::Disconnected { reason } => {
                let session_id = {
                    let mut slot = self.lock();
                    let Some(session_id) = slot.session_id.filter(|_| slot.epoch == epoch) else {
                        return;
                    };
                    slot.state = SessionState::Disconnected;
                    self.publish(&slot);
                    session_id
                };
                warn!(session_id = %session_id, reason = %reason, "transport session disconnected");
                self.emit(LifecycleEvent::Disconnected {
                    session_id,
                    reason: DisconnectReason::Transport {
                        reason: reason.clone(),
                    },
                });
                tokio::spawn(Arc::clone(self).handle_failure(epoch, FailureCause::Lost(reason)));
            }
            TransportEvent::AuthFailure { reason } => {
                let Some(session_id) = self.lock().session_id else {
                    return;
                };
                error!(session_id = %session_id, reason = %reason, "transport rejected credentials");
                self.emit(LifecycleEvent::AuthFailure {
                    session_id,
                    reason: reason.clone(),
                });
                tokio::spawn(
                    Arc::clone(self).handle_failure(epoch, FailureCause::AuthRejected(reason)),
                );
            }
            TransportEvent::MessageReceived(message) => {
                if message.kind != MessageKind::Direct {
                    debug!(sender = %message.sender, kind = ?message.kind, "ignoring non-direct message");
                    return;
                }
                debug!(sender = %message.sender, "inbound message received");
                if self.inbound.send(message).is_err() {
                    warn!("inbound message queue closed; message dropped");
                }
            }
        }
    }

    async fn persist_credentials(&self, epoch: u64, credentials: Credentials) {
        let (session_id, previous) = {
            let slot = self.lock();
            let Some(session_id) = slot.session_id.filter(|_| slot.epoch == epoch) else {
                return;
            };
            (session_id, slot.credential_source)
        };

        if let Err(e) = self.store.save(session_id, credentials).await {
            warn!(session_id = %session_id, error = %e, "failed to save session credentials");
            return;
        }

        let superseded = {
            let mut slot = self.lock();
            if slot.epoch == epoch {
                slot.credential_source = Some(session_id);
                false
            } else {
                true
            }
        };

        // Whoever superseded the attempt already cleaned up; the entry we
        // just wrote would be an orphan.
        let stale = if superseded {
            Some(session_id)
        } else {
            previous.filter(|p| *p != session_id)
        };

        debug!(session_id = %session_id, "session credentials saved");
        if let Some(stale) = stale {
            self.delete_quietly(stale).await;
        }
    }

    async fn handle_failure(self: Arc<Self>, epoch: u64, cause: FailureCause) {
        let (failed, doomed, retry) = {
            let mut slot = self.lock();
            if slot.epoch != epoch {
                debug!(cause = %cause, "ignoring failure of superseded attempt");
                return;
            }

            slot.epoch += 1;
            slot.starting = false;
            slot.last_qr = None;
            if let Some(pump) = slot.pump.take() {
                pump.abort();
            }

            let failed = slot.session_id;
            let mut doomed: Vec<SessionId> = failed.into_iter().collect();
            if let Some(source) = slot.credential_source.take()
                && !doomed.contains(&source)
            {
                doomed.push(source);
            }

            let retry = if self.policy.allows_retry(slot.retry_count) {
                slot.retry_count += 1;
                slot.state = SessionState::Disconnected;
                Some((slot.retry_count, self.policy.delay_for(slot.retry_count)))
            } else {
                slot.state = SessionState::Failed;
                None
            };
            self.publish(&slot);
            (failed, doomed, retry)
        };
        let retry_epoch = epoch + 1;

        {
            let _gate = self.transport_gate.lock().await;
            if let Some(session_id) = failed {
                self.release_transport(session_id).await;
            }
            for id in doomed {
                self.delete_quietly(id).await;
            }
        }

        match retry {
            Some((attempt, delay)) => {
                let mut slot = self.lock();
                if slot.epoch != retry_epoch {
                    debug!("retry abandoned; session changed during cleanup");
                    return;
                }
                warn!(
                    cause = %cause,
                    attempt,
                    max_retries = self.policy.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "transport session failed; retry scheduled"
                );
                let inner = Arc::clone(&self);
                if let Some(previous) = slot.retry_timer.replace(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.fire_retry(retry_epoch).await;
                })) {
                    previous.abort();
                }
            }
            None => {
                let retries = self.lock().retry_count;
                error!(cause = %cause, retries, "transport session failed; retries exhausted");
                if let Some(session_id) = failed {
                    self.emit(LifecycleEvent::Failed {
                        session_id,
                        retries,
                    });
                }
            }
        }
    }

    // Boxed so the retry timer does not make the start future's type recursive.
    fn fire_retry(self: Arc<Self>, retry_epoch: u64) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            {
                let mut slot = self.lock();
                if slot.epoch != retry_epoch {
                    return;
                }
                slot.retry_timer = None;
            }
            info!("retrying transport session");
            self.start().await;
        })
    }

    async fn stop(&self, how: Stop) -> bool {
        let (session_id, doomed) = {
            let mut slot = self.lock();
            if slot.state == SessionState::Idle {
                debug!(?how, "stopping an idle session is a no-op");
                return false;
            }

            slot.epoch += 1;
            slot.starting = false;
            if let Some(timer) = slot.retry_timer.take() {
                timer.abort();
            }
            if let Some(pump) = slot.pump.take() {
                pump.abort();
            }

            let session_id = slot.session_id.take();
            let mut doomed = Vec::new();
            if how == Stop::Teardown {
                doomed.extend(session_id);
                if let Some(source) = slot.credential_source.take()
                    && !doomed.contains(&source)
                {
                    doomed.push(source);
                }
            }
            slot.state = SessionState::Idle;
            slot.last_qr = None;
            self.publish(&slot);
            (session_id, doomed)
        };

        info!(session_id = ?session_id, ?how, "stopping transport session");
        {
            let _gate = self.transport_gate.lock().await;
            if let Some(session_id) = session_id {
                self.release_transport(session_id).await;
            }
            for id in doomed {
                self.delete_quietly(id).await;
            }
        }

        if let Some(session_id) = session_id {
            let reason = match how {
                Stop::Teardown => DisconnectReason::Teardown,
                Stop::Shutdown => DisconnectReason::Shutdown,
            };
            self.emit(LifecycleEvent::Disconnected { session_id, reason });
        }
        true
    }

    /// Callers hold the transport gate.
    async fn release_transport(&self, session_id: SessionId) {
        if let Err(e) = self.transport.disconnect(session_id).await {
            warn!(session_id = %session_id, error = %e, "failed to release transport handle");
        }
    }

    async fn delete_quietly(&self, id: SessionId) {
        if let Err(e) = self.store.delete(id).await {
            warn!(session_id = %id, error = %e, "failed to delete stored session");
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("policy", &self.inner.policy)
            .finish_non_exhaustive()
    }
}

/// Waits until the session reaches `state` or `timeout` elapses.
///
/// Returns the matching snapshot, or `None` on timeout.
pub async fn wait_for_state(
    manager: &SessionManager,
    state: SessionState,
    timeout: Duration,
) -> Option<SessionSnapshot> {
    let mut rx = manager.watch();
    let waited = tokio::time::timeout(timeout, rx.wait_for(|s| s.state == state)).await;
    match waited {
        Ok(Ok(snapshot)) => Some(snapshot.clone()),
        _ => None,
    }
}
