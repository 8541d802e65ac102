//! Broker adapter interface.
//!
//! The broker is the only subsystem permitted to touch cross-session
//! state: the server never iterates its client map to fan out a publish.
//! Binding registers a [`OutboundSink`] (the session, in practice) against
//! the broker's subscription index; publishing hands each subscribed
//! sink the raw channel payload, leaving the `publishOut` gating decision
//! to the sink itself.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;

/// Outcome of a successful `bind`. When `warning` is set the server
/// demotes whatever triggered it to a warning instead of a hard error.
#[derive(Debug, Clone, Default)]
pub struct BindOutcome {
    pub warning: Option<String>,
}

/// A session's outbound half, as seen by the broker. Implemented by
/// [`crate::session::Session`].
#[async_trait]
pub trait OutboundSink: Send + Sync {
    fn session_id(&self) -> &str;

    /// Deliver a channel payload to this subscriber. Implementations run
    /// the `publishOut` gate and write to the transport on accept, honoring
    /// silent-block the same as a hard reject (the frame is just dropped).
    async fn deliver(&self, channel: &str, data: Value);
}

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    async fn bind(&self, sink: std::sync::Arc<dyn OutboundSink>) -> Result<BindOutcome, CoreError>;

    async fn unbind(&self, session_id: &str);

    /// Subscribe an already-bound session to a channel.
    async fn subscribe(&self, session_id: &str, channel: &str);

    /// Unsubscribe an already-bound session from a channel.
    async fn unsubscribe(&self, session_id: &str, channel: &str);

    /// Fan out `data` on `channel` to every subscribed session.
    async fn publish(&self, channel: &str, data: Value) -> Result<(), CoreError>;

    /// Resolves once the broker has finished initializing (e.g. connected
    /// to its backing substrate). The in-process default resolves
    /// immediately.
    async fn ready(&self);
}
