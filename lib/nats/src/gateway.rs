//! Messaging transport reached through a gateway sidecar.
//!
//! The sidecar owns the actual messaging client. We talk to it with NATS
//! request/reply on `<prefix>.gateway.{connect,send,state,disconnect}`, and
//! it publishes the events of a session on
//! `<prefix>.session.<session_id>.events`.

use crate::config::NatsConfig;
use crate::envelope::Envelope;
use async_nats::{Client, RequestErrorKind};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::StreamExt;
use lead_intake_core::SessionId;
use lead_intake_session::{
    ConnectionState, Credentials, DeliveryReceipt, InboundMessage, MessageKind, Transport,
    TransportError, TransportEvent, TransportEvents,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

/// Capacity of the per-connection event channel.
const EVENT_BUFFER: usize = 64;

/// Fault code the gateway uses before the session is ready.
const NOT_CONNECTED_CODE: &str = "not_connected";

#[derive(Debug, Serialize)]
struct ConnectRequest {
    session_id: SessionId,
    /// Base64 of the stored credential blob.
    credentials: Option<String>,
}

#[derive(Debug, Serialize)]
struct DisconnectRequest {
    session_id: SessionId,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    recipient: &'a str,
    body: &'a str,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Empty {}

#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    message_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StateReply {
    state: ConnectionState,
}

#[derive(Debug, Deserialize)]
struct Fault {
    code: String,
    message: String,
}

/// Reply to every gateway request: a result or a fault.
#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum GatewayReply<T> {
    Ok { result: T },
    Error { error: Fault },
}

/// An event published by the gateway for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum GatewayEvent {
    Qr {
        payload: String,
    },
    Ready,
    CredentialsSaved {
        credentials: String,
    },
    Disconnected {
        reason: String,
    },
    AuthFailure {
        reason: String,
    },
    Message {
        from: String,
        body: String,
        #[serde(default)]
        sender_name: Option<String>,
    },
}

impl GatewayEvent {
    fn into_transport_event(self) -> Result<TransportEvent, TransportError> {
        Ok(match self {
            Self::Qr { payload } => TransportEvent::PairingPayload(payload),
            Self::Ready => TransportEvent::Ready,
            Self::CredentialsSaved { credentials } => {
                let bytes = STANDARD
                    .decode(credentials)
                    .map_err(|e| TransportError::Protocol {
                        reason: format!("credentials are not base64: {e}"),
                    })?;
                TransportEvent::CredentialsSaved(Credentials::new(bytes))
            }
            Self::Disconnected { reason } => TransportEvent::Disconnected { reason },
            Self::AuthFailure { reason } => TransportEvent::AuthFailure { reason },
            Self::Message {
                from,
                body,
                sender_name,
            } => TransportEvent::MessageReceived(InboundMessage {
                kind: MessageKind::from_address(&from),
                sender: from,
                body,
                sender_name,
            }),
        })
    }
}

/// The session whose events are being forwarded.
#[derive(Debug, Default)]
struct Forwarding {
    current: Option<(SessionId, JoinHandle<()>)>,
}

impl Forwarding {
    fn replace(&mut self, session_id: SessionId, forwarder: JoinHandle<()>) {
        if let Some((_, previous)) = self.current.replace((session_id, forwarder)) {
            previous.abort();
        }
    }

    /// Stops forwarding for `session_id`. Returns false if another session
    /// has taken over since.
    fn release(&mut self, session_id: SessionId) -> bool {
        match &self.current {
            Some((current, _)) if *current != session_id => false,
            _ => {
                self.clear();
                true
            }
        }
    }

    fn clear(&mut self) {
        if let Some((_, forwarder)) = self.current.take() {
            forwarder.abort();
        }
    }
}

/// Transport backed by the NATS messaging gateway.
pub struct NatsTransport {
    client: Client,
    config: NatsConfig,
    forwarding: Mutex<Forwarding>,
}

impl NatsTransport {
    #[must_use]
    pub fn new(client: Client, config: NatsConfig) -> Self {
        Self {
            client,
            config,
            forwarding: Mutex::default(),
        }
    }

    async fn request<Req, Resp>(&self, verb: &str, request: Req) -> Result<Resp, TransportError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let bytes = Envelope::seal(request).map_err(|e| TransportError::Protocol {
            reason: e.to_string(),
        })?;

        let reply = self
            .client
            .request(self.config.gateway_subject(verb), bytes.into())
            .await
            .map_err(|e| match e.kind() {
                RequestErrorKind::TimedOut => TransportError::Timeout,
                RequestErrorKind::NoResponders => TransportError::Protocol {
                    reason: "no gateway is responding".to_string(),
                },
                _ => TransportError::Protocol {
                    reason: e.to_string(),
                },
            })?;

        decode_reply(&reply.payload)
    }

    fn forwarding(&self) -> MutexGuard<'_, Forwarding> {
        self.forwarding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decode_reply<Resp: DeserializeOwned>(bytes: &[u8]) -> Result<Resp, TransportError> {
    let reply: GatewayReply<Resp> = Envelope::open(bytes).map_err(|e| TransportError::Protocol {
        reason: e.to_string(),
    })?;
    match reply {
        GatewayReply::Ok { result } => Ok(result),
        GatewayReply::Error { error } if error.code == NOT_CONNECTED_CODE => {
            Err(TransportError::NotConnected)
        }
        GatewayReply::Error { error } => Err(TransportError::Protocol {
            reason: format!("{}: {}", error.code, error.message),
        }),
    }
}

#[async_trait]
impl Transport for NatsTransport {
    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn connect(
        &self,
        session_id: SessionId,
        credentials: Option<Credentials>,
    ) -> Result<TransportEvents, TransportError> {
        // Subscribe first so nothing published right after connect is lost.
        let mut subscriber = self
            .client
            .subscribe(self.config.session_events_subject(session_id))
            .await
            .map_err(|e| TransportError::ConnectFailed {
                reason: format!("failed to subscribe to session events: {e}"),
            })?;

        let request = ConnectRequest {
            session_id,
            credentials: credentials.map(|c| STANDARD.encode(c.as_bytes())),
        };
        self.request::<_, Empty>("connect", request)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let forwarder = tokio::spawn(async move {
            while let Some(message) = subscriber.next().await {
                let event = match Envelope::<GatewayEvent>::open(&message.payload) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping undecodable gateway event");
                        continue;
                    }
                };
                let event = match event.into_transport_event() {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "dropping invalid gateway event");
                        continue;
                    }
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            debug!("gateway event forwarding stopped");
        });
        self.forwarding().replace(session_id, forwarder);

        Ok(rx)
    }

    async fn send_message(
        &self,
        recipient: &str,
        body: &str,
    ) -> Result<DeliveryReceipt, TransportError> {
        let reply: SendReply = self
            .request("send", SendRequest { recipient, body })
            .await
            .map_err(|e| match e {
                TransportError::NotConnected | TransportError::Timeout => e,
                other => TransportError::SendFailed {
                    recipient: recipient.to_string(),
                    reason: other.to_string(),
                },
            })?;
        Ok(DeliveryReceipt::accepted(recipient, reply.message_ref))
    }

    async fn connection_state(&self) -> Result<ConnectionState, TransportError> {
        let reply: StateReply = self.request("state", Empty::default()).await?;
        Ok(reply.state)
    }

    #[instrument(skip(self))]
    async fn disconnect(&self, session_id: SessionId) -> Result<(), TransportError> {
        if !self.forwarding().release(session_id) {
            debug!("ignoring disconnect of a replaced session");
            return Ok(());
        }
        self.request::<_, Empty>("disconnect", DisconnectRequest { session_id })
            .await
            .map(|_| ())
    }
}

impl Drop for NatsTransport {
    fn drop(&mut self) {
        self.forwarding().clear();
    }
}

impl std::fmt::Debug for NatsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> GatewayEvent {
        Envelope::open(format!(r#"{{"version":1,"payload":{json}}}"#).as_bytes()).expect("decode")
    }

    #[test]
    fn qr_event_becomes_pairing_payload() {
        let converted = event(r#"{"type":"qr","payload":"2@xyz"}"#)
            .into_transport_event()
            .unwrap();
        assert_eq!(converted, TransportEvent::PairingPayload("2@xyz".to_string()));
    }

    #[test]
    fn message_event_is_classified_by_address() {
        let converted = event(
            r#"{"type":"message","from":"120363025@g.us","body":"oi","sender_name":"Ana"}"#,
        )
        .into_transport_event()
        .unwrap();
        match converted {
            TransportEvent::MessageReceived(message) => {
                assert_eq!(message.kind, MessageKind::Group);
                assert_eq!(message.sender_name.as_deref(), Some("Ana"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn credentials_are_base64_decoded() {
        let converted = event(r#"{"type":"credentials_saved","credentials":"c2VjcmV0"}"#)
            .into_transport_event()
            .unwrap();
        assert_eq!(
            converted,
            TransportEvent::CredentialsSaved(Credentials::new(b"secret".to_vec()))
        );
    }

    #[test]
    fn invalid_credentials_are_a_protocol_error() {
        let err = event(r#"{"type":"credentials_saved","credentials":"***"}"#)
            .into_transport_event()
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));
    }

    #[test]
    fn ok_reply_yields_result() {
        let reply: StateReply = decode_reply(
            br#"{"version":1,"payload":{"status":"ok","result":{"state":"PAIRING"}}}"#,
        )
        .unwrap();
        assert_eq!(reply.state, ConnectionState::Pairing);
    }

    #[test]
    fn not_connected_fault_is_mapped() {
        let err = decode_reply::<SendReply>(
            br#"{"version":1,"payload":{"status":"error","error":{"code":"not_connected","message":"call connect first"}}}"#,
        )
        .unwrap_err();
        assert_eq!(err, TransportError::NotConnected);
    }

    #[test]
    fn other_faults_keep_their_message() {
        let err = decode_reply::<SendReply>(
            br#"{"version":1,"payload":{"status":"error","error":{"code":"rate_limited","message":"slow down"}}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("rate_limited: slow down"));
    }

    fn pending_forwarder() -> JoinHandle<()> {
        tokio::spawn(std::future::pending())
    }

    #[tokio::test]
    async fn disconnect_of_replaced_session_keeps_current_forwarder() {
        let (old, live) = (SessionId::new(), SessionId::new());
        let mut forwarding = Forwarding::default();
        forwarding.replace(old, pending_forwarder());
        forwarding.replace(live, pending_forwarder());

        assert!(!forwarding.release(old));
        let (current, forwarder) = forwarding.current.as_ref().unwrap();
        assert_eq!(*current, live);
        assert!(!forwarder.is_finished());

        assert!(forwarding.release(live));
        assert!(forwarding.current.is_none());
    }

    #[tokio::test]
    async fn releasing_current_session_stops_forwarding() {
        let id = SessionId::new();
        let forwarder = pending_forwarder();
        let handle = forwarder.abort_handle();
        let mut forwarding = Forwarding::default();
        forwarding.replace(id, forwarder);

        assert!(forwarding.release(id));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(handle.is_finished());

        // With nothing forwarded, a failed connect is still released remotely.
        assert!(forwarding.release(SessionId::new()));
    }

    #[test]
    fn disconnect_request_names_the_session() {
        let session_id = SessionId::new();
        let json = serde_json::to_value(DisconnectRequest { session_id }).unwrap();
        assert_eq!(json["session_id"], session_id.as_ulid().to_string());
    }

    #[test]
    fn connect_request_encodes_credentials() {
        let request = ConnectRequest {
            session_id: SessionId::new(),
            credentials: Some(STANDARD.encode(b"secret")),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["credentials"], "c2VjcmV0");
    }
}
