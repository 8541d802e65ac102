//! Socket session and channel gate: the per-connection state machine,
//! control-event demux, and inbound/outbound gating.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::broker::OutboundSink;
use crate::context::ServerContext;
use crate::correlator::{OutboundReply, ResponseCorrelator};
use crate::error::CoreError;
use crate::middleware::{Decision, Stage, StageRequest};
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

/// What the core needs from the underlying framed transport: write a JSON
/// object, and close the connection (optionally with an HTTP-style
/// status for a pre-open rejection).
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send_object(&self, value: Value) -> Result<(), CoreError>;
    async fn close(&self, status: u16, reason: &str);
}

/// A correlated or uncorrelated inbound frame, as defined by the wire
/// protocol.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    pub cid: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct HandshakeData {
    #[serde(rename = "authToken")]
    auth_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PublishData {
    channel: String,
    #[serde(default)]
    data: Value,
}

pub struct Session {
    id: String,
    transport: Arc<dyn Transport>,
    server: Weak<dyn ServerContext>,
    auth_token: RwLock<Option<Token>>,
    state: RwLock<SessionState>,
    handshake_done: AtomicBool,
    handshake_timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(id: String, transport: Arc<dyn Transport>, server: Weak<dyn ServerContext>) -> Arc<Self> {
        Arc::new(Self {
            id,
            transport,
            server,
            auth_token: RwLock::new(None),
            state: RwLock::new(SessionState::Connecting),
            handshake_done: AtomicBool::new(false),
            handshake_timer: parking_lot::Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn auth_token(&self) -> Option<Token> {
        self.auth_token.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.read().is_some()
    }

    fn server(&self) -> Option<Arc<dyn ServerContext>> {
        self.server.upgrade()
    }

    /// Arm the one-shot handshake timer. Fires `HandshakeTimeout` as a
    /// `warning` event if `#handshake` has not landed by then.
    pub fn arm_handshake_timer(self: &Arc<Self>) {
        let session = self.clone();
        let Some(ctx) = self.server() else { return };
        let ack_timeout = ctx.config().ack_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(ack_timeout).await;
            if session.handshake_done.load(Ordering::SeqCst) {
                return;
            }
            if session.state() == SessionState::Closed {
                return;
            }
            if let Some(ctx) = session.server() {
                ctx.emit(crate::events::ServerEvent::Error(Arc::new(
                    CoreError::HandshakeTimeout,
                )));
            }
            debug!(session_id = %session.id, "handshake timeout");
        });
        *self.handshake_timer.lock() = Some(handle);
    }

    fn cancel_handshake_timer(&self) {
        if let Some(handle) = self.handshake_timer.lock().take() {
            handle.abort();
        }
    }

    pub async fn write_reply(&self, reply: OutboundReply) -> Result<(), CoreError> {
        let value = serde_json::to_value(&reply)
            .map_err(|e| CoreError::Internal(format!("failed to encode reply: {e}")))?;
        self.transport.send_object(value).await
    }

    /// Entry point for every inbound frame: demuxes into handshake,
    /// control, or generic emit handling.
    pub async fn handle_inbound(self: &Arc<Self>, frame: InboundFrame) {
        if self.state() == SessionState::Closed {
            return;
        }

        let correlator = Arc::new(ResponseCorrelator::new(frame.cid, Arc::downgrade(self)));

        if let Some(event) = frame.event.strip_prefix('#') {
            self.handle_control(event, frame.data, correlator).await;
        } else {
            self.handle_emit(frame.event, frame.data, correlator).await;
        }
    }

    async fn handle_control(
        self: &Arc<Self>,
        event: &str,
        data: Value,
        correlator: Arc<ResponseCorrelator>,
    ) {
        match event {
            "handshake" => self.handle_handshake(data, correlator).await,
            "authenticate" => self.handle_authenticate(data, correlator).await,
            "removeAuthToken" => self.handle_remove_auth_token().await,
            "subscribe" => self.handle_subscribe(data, correlator).await,
            "publish" => self.handle_publish(data, correlator).await,
            other => {
                debug!(session_id = %self.id, event = other, "reserved event, passed through without middleware");
            }
        }
    }

    async fn handle_handshake(self: &Arc<Self>, data: Value, correlator: Arc<ResponseCorrelator>) {
        // A repeat #handshake is asserted against explicitly rather than
        // relying on the control handler having been unregistered.
        if self.handshake_done.swap(true, Ordering::SeqCst) {
            warn!(session_id = %self.id, "duplicate #handshake ignored");
            return;
        }

        let Some(ctx) = self.server() else { return };
        self.cancel_handshake_timer();

        let handshake_data: HandshakeData = serde_json::from_value(data).unwrap_or_default();

        let mut auth_error: Option<CoreError> = None;
        if let Some(signed) = handshake_data.auth_token {
            match ctx.verify_token(&signed).await {
                Ok(token) => {
                    let expired = token.is_expired();
                    let exp = token.exp.unwrap_or_default();
                    *self.auth_token.write() = Some(token);
                    if expired {
                        self.deauthenticate("token expired at handshake").await;
                        auth_error = Some(CoreError::AuthTokenExpired { exp });
                    }
                }
                Err(err) => {
                    self.emit_bad_auth_token_locally(&err);
                    ctx.emit(crate::events::ServerEvent::BadSocketAuthToken {
                        session_id: self.id.clone(),
                        error: Arc::new(err.clone_wire_only()),
                    });
                    auth_error = Some(err);
                }
            }
        }

        let sink: Arc<dyn OutboundSink> = self.clone();
        match ctx.broker_bind(sink).await {
            Ok(outcome) => {
                *self.state.write() = SessionState::Open;
                ctx.register_client(self.clone());
                if let Some(warning) = outcome.warning {
                    ctx.emit(crate::events::ServerEvent::Warning(Arc::new(
                        CoreError::BrokerBindFailed(warning),
                    )));
                }
                ctx.emit(crate::events::ServerEvent::Handshake { session_id: self.id.clone() });
                ctx.emit(crate::events::ServerEvent::Connection { session_id: self.id.clone() });

                let mut reply = serde_json::json!({
                    "id": self.id,
                    "isAuthenticated": self.is_authenticated(),
                    "pingTimeout": ctx.config().ping_timeout.as_millis() as u64,
                });
                if let Some(err) = &auth_error {
                    reply["authError"] = serde_json::to_value(err.to_wire()).unwrap_or(Value::Null);
                }
                let _ = correlator.end(Some(reply)).await;
            }
            Err(err) => {
                let fail_frame = serde_json::json!({
                    "event": "#fail",
                    "data": serde_json::to_value(err.to_wire()).unwrap_or(Value::Null),
                });
                let _ = self.transport.send_object(fail_frame).await;
                self.transport.close(500, "bind failed").await;
                let _ = correlator.error(&err, None).await;
                self.disconnect().await;
            }
        }
    }

    async fn handle_authenticate(self: &Arc<Self>, data: Value, correlator: Arc<ResponseCorrelator>) {
        let Some(ctx) = self.server() else { return };
        let signed = data.as_str().map(str::to_string);

        let auth_error = match signed {
            None => None,
            Some(signed) => match ctx.verify_token(&signed).await {
                Ok(token) => {
                    let expired = token.is_expired();
                    let exp = token.exp.unwrap_or_default();
                    *self.auth_token.write() = Some(token);
                    if expired {
                        self.deauthenticate("token expired at #authenticate").await;
                        Some(CoreError::AuthTokenExpired { exp })
                    } else {
                        None
                    }
                }
                Err(err) => {
                    self.emit_bad_auth_token_locally(&err);
                    ctx.emit(crate::events::ServerEvent::BadSocketAuthToken {
                        session_id: self.id.clone(),
                        error: Arc::new(err.clone_wire_only()),
                    });
                    Some(err)
                }
            },
        };

        if ctx.config().gate_authenticate {
            let decision = ctx
                .pipeline()
                .run(
                    Stage::Emit,
                    StageRequest::Emit {
                        session_id: self.id.clone(),
                        event: "#authenticate".to_string(),
                        data: Value::Null,
                        auth_token_expired_error: None,
                    },
                )
                .await;
            if let Decision::Reject(err) = decision {
                let _ = correlator.error(&err, None).await;
                return;
            }
        }

        // Auth failures are soft: they never occupy the error slot.
        let reply = serde_json::json!({
            "isAuthenticated": self.is_authenticated(),
            "authError": auth_error.as_ref().map(CoreError::to_wire),
        });
        let _ = correlator.end(Some(reply)).await;
    }

    async fn handle_remove_auth_token(self: &Arc<Self>) {
        let previous = self.auth_token.write().take();
        if previous.is_some() {
            debug!(session_id = %self.id, "auth token removed");
        }
    }

    /// The session-local half of a bad-auth-token signal, distinct from
    /// the server-wide `badSocketAuthToken` broadcast: a listener scoped
    /// to this one connection, not every connection on the server.
    fn emit_bad_auth_token_locally(&self, err: &CoreError) {
        warn!(session_id = %self.id, error = %err, "badAuthToken");
    }

    async fn deauthenticate(&self, reason: &str) {
        self.auth_token.write().take();
        debug!(session_id = %self.id, reason, "deauthenticate");
    }

    /// Compute `authTokenExpiredError` for a gated event, deauthenticating
    /// as a side effect if the token just expired.
    async fn auth_token_expired_error(&self) -> Option<CoreError> {
        let expired = {
            let guard = self.auth_token.read();
            guard.as_ref().map(|t| (t.exp, t.is_expired())).filter(|(_, e)| *e)
        };
        if let Some((exp, _)) = expired {
            self.deauthenticate("token expired").await;
            Some(CoreError::AuthTokenExpired { exp: exp.unwrap_or_default() })
        } else {
            None
        }
    }

    async fn handle_emit(self: &Arc<Self>, event: String, data: Value, correlator: Arc<ResponseCorrelator>) {
        let Some(ctx) = self.server() else { return };
        let expired_error = self.auth_token_expired_error().await.map(Arc::new);

        let decision = ctx
            .pipeline()
            .run(
                Stage::Emit,
                StageRequest::Emit {
                    session_id: self.id.clone(),
                    event: event.clone(),
                    data: data.clone(),
                    auth_token_expired_error: expired_error,
                },
            )
            .await;

        match decision {
            Decision::Accept => {
                let _ = correlator.end(None).await;
            }
            Decision::SilentBlock => {
                let _ = correlator.error(&CoreError::SilentMiddlewareBlocked { stage: Stage::Emit }, None).await;
            }
            Decision::Reject(err) => {
                let _ = correlator.error(&err, None).await;
            }
        }
    }

    async fn handle_subscribe(self: &Arc<Self>, data: Value, correlator: Arc<ResponseCorrelator>) {
        let Some(ctx) = self.server() else { return };
        let Some(channel) = data.as_str().map(str::to_string) else {
            let _ = correlator
                .error(&CoreError::Internal("subscribe requires a channel string".into()), None)
                .await;
            return;
        };
        let expired_error = self.auth_token_expired_error().await.map(Arc::new);

        let decision = ctx
            .pipeline()
            .run(
                Stage::Subscribe,
                StageRequest::Subscribe {
                    session_id: self.id.clone(),
                    channel: channel.clone(),
                    auth_token_expired_error: expired_error,
                },
            )
            .await;

        match decision {
            Decision::Accept => {
                ctx.broker_subscribe(&self.id, &channel).await;
                let _ = correlator.end(None).await;
            }
            Decision::SilentBlock => {
                let _ = correlator.error(&CoreError::SilentMiddlewareBlocked { stage: Stage::Subscribe }, None).await;
            }
            Decision::Reject(err) => {
                let _ = correlator.error(&err, None).await;
            }
        }
    }

    async fn handle_publish(self: &Arc<Self>, data: Value, correlator: Arc<ResponseCorrelator>) {
        let Some(ctx) = self.server() else { return };

        if !ctx.config().allow_client_publish {
            let _ = correlator.error(&CoreError::ClientPublishDisabled, None).await;
            return;
        }

        let Ok(publish) = serde_json::from_value::<PublishData>(data) else {
            let _ = correlator
                .error(&CoreError::Internal("publish requires { channel, data }".into()), None)
                .await;
            return;
        };

        let expired_error = self.auth_token_expired_error().await.map(Arc::new);

        let decision = ctx
            .pipeline()
            .run(
                Stage::PublishIn,
                StageRequest::PublishIn {
                    session_id: self.id.clone(),
                    channel: publish.channel.clone(),
                    data: publish.data.clone(),
                    auth_token_expired_error: expired_error,
                },
            )
            .await;

        match decision {
            Decision::Accept => match ctx.broker_publish(&publish.channel, publish.data).await {
                Ok(()) => {
                    let _ = correlator.end(None).await;
                }
                Err(err) => {
                    let _ = correlator.error(&err, None).await;
                }
            },
            Decision::SilentBlock => {
                let _ = correlator.error(&CoreError::SilentMiddlewareBlocked { stage: Stage::PublishIn }, None).await;
            }
            Decision::Reject(err) => {
                let _ = correlator.error(&err, None).await;
            }
        }
    }

    /// Cancel timers, unregister, unbind, and emit disconnection.
    pub async fn disconnect(self: &Arc<Self>) {
        let already_closed = {
            let mut state = self.state.write();
            let was_closed = *state == SessionState::Closed;
            *state = SessionState::Closed;
            was_closed
        };
        if already_closed {
            return;
        }

        self.cancel_handshake_timer();

        if let Some(ctx) = self.server() {
            ctx.broker_unbind(&self.id).await;
            ctx.remove_client(&self.id);
            ctx.emit(crate::events::ServerEvent::Disconnection { session_id: self.id.clone() });
        }
    }
}

#[async_trait]
impl OutboundSink for Session {
    fn session_id(&self) -> &str {
        &self.id
    }

    async fn deliver(&self, channel: &str, data: Value) {
        if self.state() != SessionState::Open {
            return;
        }
        let Some(ctx) = self.server() else { return };

        let decision = ctx
            .pipeline()
            .run(
                Stage::PublishOut,
                StageRequest::PublishOut {
                    channel: channel.to_string(),
                    data: data.clone(),
                },
            )
            .await;

        if !matches!(decision, Decision::Accept) {
            return;
        }

        let frame = serde_json::json!({
            "event": "#publish",
            "data": { "channel": channel, "data": data },
        });
        if let Err(err) = self.transport.send_object(frame).await {
            warn!(session_id = %self.id, error = %err, "Socket Error: failed to deliver publish frame");
        }
    }
}

impl CoreError {
    /// Used when an error needs to travel into an `Arc<CoreError>` event
    /// payload without moving the original (errors here aren't `Clone`
    /// because most variants carry owned data cheaply re-describable from
    /// `name()`/`to_string()`).
    fn clone_wire_only(&self) -> CoreError {
        CoreError::Internal(format!("{}: {}", self.name(), self))
    }
}
