//! Relays session lifecycle events to a notifier.

use crate::error::NotifyError;
use crate::notifier::Notifier;
use lead_intake_session::LifecycleEvent;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Republishes lifecycle events on a notification channel.
///
/// Holds nothing but the last pairing payload, which late subscribers can
/// fetch instead of waiting for the next one.
#[derive(Clone)]
pub struct EventBridge {
    notifier: Arc<dyn Notifier>,
    last_pairing_payload: Arc<RwLock<Option<String>>>,
}

impl EventBridge {
    #[must_use]
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            last_pairing_payload: Arc::default(),
        }
    }

    /// The pairing payload still waiting for a scan, if any.
    #[must_use]
    pub fn last_pairing_payload(&self) -> Option<String> {
        self.last_pairing_payload
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Relays one event. Returns true if it was published.
    pub async fn relay(&self, event: &LifecycleEvent) -> bool {
        match event {
            LifecycleEvent::PairingPayload { payload, .. } => {
                self.remember_pairing(Some(payload.clone()));
            }
            LifecycleEvent::Ready { .. } | LifecycleEvent::Disconnected { .. } => {
                self.remember_pairing(None);
            }
            LifecycleEvent::AuthFailure { .. } => {}
            LifecycleEvent::Failed {
                session_id,
                retries,
            } => {
                self.remember_pairing(None);
                error!(session_id = %session_id, retries, "session failed; not relayed");
                return false;
            }
        }

        match self.publish(event).await {
            Ok(()) => {
                debug!(event = event.name(), session_id = %event.session_id(), "lifecycle event relayed");
                true
            }
            Err(e) => {
                warn!(event = event.name(), error = %e, "failed to relay lifecycle event");
                false
            }
        }
    }

    /// Relays events until the channel closes.
    pub async fn run(self, mut events: broadcast::Receiver<LifecycleEvent>) {
        info!("event bridge started");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.relay(&event).await;
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "event bridge fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("event bridge stopped");
    }

    /// Spawns [`run`](Self::run) on the runtime.
    pub fn spawn(self, events: broadcast::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn publish(&self, event: &LifecycleEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_value(event).map_err(|e| NotifyError::Encode {
            event: event.name().to_string(),
            reason: e.to_string(),
        })?;
        self.notifier.publish(event.name(), payload).await
    }

    fn remember_pairing(&self, payload: Option<String>) {
        *self
            .last_pairing_payload
            .write()
            .unwrap_or_else(PoisonError::into_inner) = payload;
    }
}

impl std::fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBridge")
            .field("last_pairing_payload", &self.last_pairing_payload())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lead_intake_core::SessionId;
    use lead_intake_session::DisconnectReason;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct RecordingNotifier {
        published: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn names(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(name, _)| name.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn publish(
            &self,
            event: &str,
            payload: serde_json::Value,
        ) -> Result<(), NotifyError> {
            if self.fail {
                return Err(NotifyError::PublishFailed {
                    event: event.to_string(),
                    reason: "no responders".to_string(),
                });
            }
            self.published
                .lock()
                .unwrap()
                .push((event.to_string(), payload));
            Ok(())
        }
    }

    fn qr(session_id: SessionId) -> LifecycleEvent {
        LifecycleEvent::PairingPayload {
            session_id,
            payload: "2@abc".to_string(),
        }
    }

    #[tokio::test]
    async fn relays_the_four_operator_events() {
        let notifier = RecordingNotifier::default();
        let bridge = EventBridge::new(Arc::new(notifier.clone()));
        let session_id = SessionId::new();

        for event in [
            qr(session_id),
            LifecycleEvent::Ready { session_id },
            LifecycleEvent::Disconnected {
                session_id,
                reason: DisconnectReason::Teardown,
            },
            LifecycleEvent::AuthFailure {
                session_id,
                reason: "logged out".to_string(),
            },
        ] {
            assert!(bridge.relay(&event).await);
        }

        assert_eq!(
            notifier.names(),
            vec!["qr", "ready", "disconnected", "auth_failure"]
        );
        let (_, payload) = notifier.published.lock().unwrap()[0].clone();
        assert_eq!(payload["payload"], "2@abc");
        assert_eq!(payload["session_id"], session_id.as_ulid().to_string());
    }

    #[tokio::test]
    async fn failed_is_not_relayed() {
        let notifier = RecordingNotifier::default();
        let bridge = EventBridge::new(Arc::new(notifier.clone()));

        let relayed = bridge
            .relay(&LifecycleEvent::Failed {
                session_id: SessionId::new(),
                retries: 5,
            })
            .await;

        assert!(!relayed);
        assert!(notifier.names().is_empty());
    }

    #[tokio::test]
    async fn remembers_pairing_payload_until_ready() {
        let bridge = EventBridge::new(Arc::new(RecordingNotifier::default()));
        let session_id = SessionId::new();

        bridge.relay(&qr(session_id)).await;
        assert_eq!(bridge.last_pairing_payload().as_deref(), Some("2@abc"));

        bridge.relay(&LifecycleEvent::Ready { session_id }).await;
        assert!(bridge.last_pairing_payload().is_none());
    }

    #[tokio::test]
    async fn publish_failure_keeps_state() {
        let notifier = RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        };
        let bridge = EventBridge::new(Arc::new(notifier));

        assert!(!bridge.relay(&qr(SessionId::new())).await);
        assert_eq!(bridge.last_pairing_payload().as_deref(), Some("2@abc"));
    }

    #[tokio::test]
    async fn run_drains_channel_until_closed() {
        let notifier = RecordingNotifier::default();
        let bridge = EventBridge::new(Arc::new(notifier.clone()));
        let (tx, rx) = broadcast::channel(8);
        let handle = bridge.spawn(rx);

        let session_id = SessionId::new();
        tx.send(qr(session_id)).unwrap();
        tx.send(LifecycleEvent::Ready { session_id }).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(notifier.names(), vec!["qr", "ready"]);
    }
}
