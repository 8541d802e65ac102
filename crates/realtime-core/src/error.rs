//! Wire-visible error kinds shared by every component of the core engine.
//!
//! The wire contract (`{ name, message, stack? }`) wants one flat namespace
//! of stable names. Rather than scatter a `thiserror` enum per module,
//! every kind the core can produce lives in one enum here and `name()`
//! returns the literal tag clients see.

use serde::Serialize;

use crate::middleware::Stage;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("auth token expired at {exp}")]
    AuthTokenExpired { exp: i64 },

    #[error("auth token invalid: {0}")]
    AuthTokenInvalid(String),

    #[error("auth token malformed: {0}")]
    AuthTokenMalformed(String),

    #[error("handshake did not complete within the ack timeout")]
    HandshakeTimeout,

    #[error("origin rejected by origin policy")]
    InvalidOrigin,

    #[error("broker bind failed: {0}")]
    BrokerBindFailed(String),

    #[error("broker unbind failed: {0}")]
    BrokerUnbindFailed(String),

    #[error("{stage} middleware silently blocked the request")]
    SilentMiddlewareBlocked { stage: Stage },

    #[error("a gate in the {stage} stage invoked its continuation more than once")]
    MiddlewareDoubleCallback { stage: Stage },

    #[error("client-initiated publish is disabled")]
    ClientPublishDisabled,

    #[error("a reply for rid {rid} was already sent")]
    ResponseAlreadySent { rid: u64 },

    #[error("authPrivateKey and authPublicKey must be specified together: {0}")]
    AuthKeyConfigError(String),

    #[error("{stage} middleware rejected the request: {message}")]
    MiddlewareRejected { stage: Stage, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable, wire-visible name for this error kind.
    pub fn name(&self) -> &'static str {
        match self {
            CoreError::AuthTokenExpired { .. } => "TokenExpired",
            CoreError::AuthTokenInvalid(_) => "AuthTokenInvalid",
            CoreError::AuthTokenMalformed(_) => "TokenMalformed",
            CoreError::HandshakeTimeout => "HandshakeTimeout",
            CoreError::InvalidOrigin => "InvalidOrigin",
            CoreError::BrokerBindFailed(_) => "BrokerBindFailed",
            CoreError::BrokerUnbindFailed(_) => "BrokerUnbindFailed",
            CoreError::SilentMiddlewareBlocked { .. } => "SilentMiddlewareBlocked",
            CoreError::MiddlewareDoubleCallback { .. } => "MiddlewareDoubleCallback",
            CoreError::ClientPublishDisabled => "ClientPublishDisabled",
            CoreError::ResponseAlreadySent { .. } => "ResponseAlreadySent",
            CoreError::AuthKeyConfigError(_) => "AuthKeyConfigError",
            CoreError::MiddlewareRejected { .. } => "MiddlewareRejected",
            CoreError::Transport(_) => "TransportError",
            CoreError::Internal(_) => "InternalError",
        }
    }

    /// `true` iff this is a soft auth failure (token expired / malformed / invalid).
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            CoreError::AuthTokenExpired { .. }
                | CoreError::AuthTokenInvalid(_)
                | CoreError::AuthTokenMalformed(_)
        )
    }

    pub fn to_wire(&self) -> WireError {
        WireError {
            name: self.name().to_string(),
            message: self.to_string(),
            stack: None,
        }
    }
}

/// `{ name, message, stack? }` as it appears on the wire.
///
/// `stack` is always `None` here -- there is no backtrace captured to
/// serialize -- but the field is kept so the frame shape matches the
/// protocol exactly.
#[derive(Debug, Clone, Serialize)]
pub struct WireError {
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&CoreError> for WireError {
    fn from(err: &CoreError) -> Self {
        err.to_wire()
    }
}
