//! Server-level event emitter surface.
//!
//! Known events are a closed, tagged `enum` broadcast over a
//! `tokio::sync::broadcast` channel rather than a name-keyed dynamic
//! emitter, so the reserved `#`-prefixed control events are a first-class
//! variant instead of a string comparison on the hot path.

use std::sync::Arc;

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Handshake { session_id: String },
    Connection { session_id: String },
    Disconnection { session_id: String },
    Warning(Arc<CoreError>),
    Error(Arc<CoreError>),
    BadSocketAuthToken { session_id: String, error: Arc<CoreError> },
    Ready,
}
