//! Connection lifecycle, middleware pipeline, and channel-gating engine
//! for a realtime, message-oriented pub/sub server.
//!
//! The crate is deliberately transport- and broker-agnostic: [`Server`]
//! is generic over a [`Broker`] and a [`TokenVerifier`]/[`TokenSigner`]
//! pair, and drives an abstract [`Transport`] rather than any particular
//! socket library. `realtime-auth`, `realtime-broker`, and
//! `realtime-server` supply the default implementations.

pub mod broker;
pub mod config;
pub mod context;
pub mod correlator;
pub mod error;
pub mod events;
pub mod middleware;
pub mod origin;
pub mod server;
pub mod session;
pub mod token;

pub use broker::{BindOutcome, Broker, OutboundSink};
pub use config::{AuthKeyConfig, ServerConfig};
pub use context::ServerContext;
pub use correlator::{OutboundReply, ResponseCorrelator};
pub use error::{CoreError, WireError};
pub use events::ServerEvent;
pub use middleware::{async_gate, Continuation, Decision, GateFn, MiddlewarePipeline, Stage, StageRequest};
pub use origin::OriginPolicy;
pub use server::Server;
pub use session::{InboundFrame, Session, SessionState, Transport};
pub use token::{Token, TokenSigner, TokenVerifier};
