//! The server-facing interface a [`crate::session::Session`] needs.
//!
//! `Server<B, V>` is generic over its broker and token service; `Session`
//! is not (sessions of different generic `Server` instantiations still
//! need to share one type so they can live in the same connection-handling
//! code). Per the cyclic-reference design note, the session holds a
//! `Weak<dyn ServerContext>` rather than a typed back-reference, breaking
//! the generic parameter out through a trait object.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::broker::{BindOutcome, OutboundSink};
use crate::config::ServerConfig;
use crate::error::CoreError;
use crate::events::ServerEvent;
use crate::middleware::MiddlewarePipeline;
use crate::session::Session;
use crate::token::Token;

#[async_trait]
pub trait ServerContext: Send + Sync {
    fn config(&self) -> &ServerConfig;
    fn pipeline(&self) -> &MiddlewarePipeline;

    async fn verify_token(&self, signed: &str) -> Result<Token, CoreError>;
    async fn sign_token(&self, claims: Value, expiry_secs: Option<i64>) -> Result<String, CoreError>;

    async fn broker_bind(&self, sink: Arc<dyn OutboundSink>) -> Result<BindOutcome, CoreError>;
    async fn broker_unbind(&self, session_id: &str);
    async fn broker_subscribe(&self, session_id: &str, channel: &str);
    async fn broker_unsubscribe(&self, session_id: &str, channel: &str);
    async fn broker_publish(&self, channel: &str, data: Value) -> Result<(), CoreError>;

    fn register_client(&self, session: Arc<Session>);
    fn remove_client(&self, session_id: &str);

    fn emit(&self, event: ServerEvent);
}
