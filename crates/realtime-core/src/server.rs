//! The server: owns the client table, the middleware pipeline, and the
//! pluggable broker/token services, and drives connection acceptance.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::broker::{BindOutcome, Broker, OutboundSink};
use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::CoreError;
use crate::events::ServerEvent;
use crate::middleware::{Decision, MiddlewarePipeline, Stage, StageRequest};
use crate::origin::OriginPolicy;
use crate::session::{Session, Transport};
use crate::token::{Token, TokenSigner, TokenVerifier};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Generic over the broker and token service so a deployment can swap
/// either one without touching the connection-handling engine.
pub struct Server<B, V> {
    config: ServerConfig,
    origin_policy: OriginPolicy,
    pipeline: MiddlewarePipeline,
    broker: Arc<B>,
    token_service: Arc<V>,
    clients: DashMap<String, Arc<Session>>,
    events_tx: broadcast::Sender<ServerEvent>,
}

impl<B, V> Server<B, V>
where
    B: Broker,
    V: TokenVerifier + TokenSigner,
{
    /// Constructs the server and awaits the broker's `ready` signal before
    /// returning, forwarding it as a [`ServerEvent::Ready`] the way the
    /// controller forwards every other broker-originated signal.
    pub async fn new(config: ServerConfig, broker: Arc<B>, token_service: Arc<V>) -> Arc<Self> {
        let origin_policy = config.origin_policy();
        let pipeline = MiddlewarePipeline::new(config.middleware_emit_warnings);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let (warn_tx, mut warn_rx) = mpsc::unbounded_channel::<CoreError>();
        pipeline.set_warning_sink(warn_tx);

        let server = Arc::new(Self {
            config,
            origin_policy,
            pipeline,
            broker,
            token_service,
            clients: DashMap::new(),
            events_tx,
        });

        let forward_target = server.events_tx.clone();
        tokio::spawn(async move {
            while let Some(err) = warn_rx.recv().await {
                let _ = forward_target.send(ServerEvent::Warning(Arc::new(err)));
            }
        });

        server.broker.ready().await;
        let _ = server.events_tx.send(ServerEvent::Ready);

        server
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events_tx.subscribe()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client(&self, session_id: &str) -> Option<Arc<Session>> {
        self.clients.get(session_id).map(|entry| entry.clone())
    }

    /// Checks the origin policy and runs the `handshake` middleware stage,
    /// without touching a transport. Meant to run *before* a transport
    /// upgrade completes, so a rejection can still produce a real
    /// HTTP-status response instead of a post-upgrade close frame.
    pub async fn check_connection_allowed(&self, origin: Option<&str>, path: &str) -> Result<(), CoreError> {
        if !self.origin_policy.is_allowed(origin) {
            return Err(CoreError::InvalidOrigin);
        }

        let decision = self
            .pipeline
            .run(
                Stage::Handshake,
                StageRequest::Handshake {
                    origin: origin.map(str::to_string),
                    path: path.to_string(),
                },
            )
            .await;

        match decision {
            Decision::Accept => Ok(()),
            Decision::SilentBlock => Err(CoreError::SilentMiddlewareBlocked { stage: Stage::Handshake }),
            Decision::Reject(err) => Err((*err).clone_for_rejection()),
        }
    }

    /// Create and arm a [`Session`] over an already-upgraded transport.
    /// Callers must have already checked [`Self::check_connection_allowed`]
    /// for this connection. The caller owns reading frames off the
    /// transport and feeding them to `Session::handle_inbound`.
    pub fn create_session(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Arc<Session> {
        let ctx: Arc<dyn ServerContext> = self.clone();
        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(session_id, transport, Arc::downgrade(&ctx));
        session.arm_handshake_timer();

        info!(session_id = %session.id(), "connection accepted, awaiting #handshake");
        session
    }
}

impl CoreError {
    fn clone_for_rejection(&self) -> CoreError {
        CoreError::MiddlewareRejected {
            stage: Stage::Handshake,
            message: self.to_string(),
        }
    }
}

#[async_trait]
impl<B, V> ServerContext for Server<B, V>
where
    B: Broker,
    V: TokenVerifier + TokenSigner,
{
    fn config(&self) -> &ServerConfig {
        &self.config
    }

    fn pipeline(&self) -> &MiddlewarePipeline {
        &self.pipeline
    }

    async fn verify_token(&self, signed: &str) -> Result<Token, CoreError> {
        self.token_service.verify_token(signed).await
    }

    async fn sign_token(&self, claims: Value, expiry_secs: Option<i64>) -> Result<String, CoreError> {
        self.token_service.sign_token(claims, expiry_secs).await
    }

    async fn broker_bind(&self, sink: Arc<dyn OutboundSink>) -> Result<BindOutcome, CoreError> {
        self.broker.bind(sink).await
    }

    async fn broker_unbind(&self, session_id: &str) {
        self.broker.unbind(session_id).await;
    }

    async fn broker_subscribe(&self, session_id: &str, channel: &str) {
        self.broker.subscribe(session_id, channel).await;
    }

    async fn broker_unsubscribe(&self, session_id: &str, channel: &str) {
        self.broker.unsubscribe(session_id, channel).await;
    }

    async fn broker_publish(&self, channel: &str, data: Value) -> Result<(), CoreError> {
        self.broker.publish(channel, data).await
    }

    fn register_client(&self, session: Arc<Session>) {
        self.clients.insert(session.id().to_string(), session);
    }

    fn remove_client(&self, session_id: &str) {
        self.clients.remove(session_id);
    }

    fn emit(&self, event: ServerEvent) {
        let _ = self.events_tx.send(event);
    }
}

