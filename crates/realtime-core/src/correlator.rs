//! Response correlator: represents one pending reply for a correlated
//! inbound message and guarantees at-most-once send.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, WireError};
use crate::session::Session;

#[derive(Debug, Serialize)]
pub struct OutboundReply {
    pub rid: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// One pending reply. Holds a non-owning handle back to the session per
/// the cyclic-reference strategy in the design notes: the correlator
/// never keeps the session alive on its own.
pub struct ResponseCorrelator {
    rid: Option<u64>,
    session: Weak<Session>,
    sent: AtomicBool,
}

impl ResponseCorrelator {
    pub fn new(rid: Option<u64>, session: Weak<Session>) -> Self {
        Self {
            rid,
            session,
            sent: AtomicBool::new(false),
        }
    }

    pub fn rid(&self) -> Option<u64> {
        self.rid
    }

    /// Reply success. No-op if no `rid` was attached to the request.
    pub async fn end(&self, payload: Option<Value>) -> Result<(), CoreError> {
        self.respond(payload, None).await
    }

    /// Reply failure, normalizing `err` into the structured wire shape.
    pub async fn error(&self, err: &CoreError, payload: Option<Value>) -> Result<(), CoreError> {
        self.respond(payload, Some(err.to_wire())).await
    }

    /// Convenience matching the JS `callback(err, payload)` shape.
    pub async fn callback(
        &self,
        err: Option<&CoreError>,
        payload: Option<Value>,
    ) -> Result<(), CoreError> {
        match err {
            Some(err) => self.error(err, payload).await,
            None => self.end(payload).await,
        }
    }

    async fn respond(
        &self,
        data: Option<Value>,
        error: Option<WireError>,
    ) -> Result<(), CoreError> {
        let Some(rid) = self.rid else {
            return Ok(());
        };

        if self.sent.swap(true, Ordering::SeqCst) {
            return Err(CoreError::ResponseAlreadySent { rid });
        }

        let Some(session) = self.session.upgrade() else {
            // The transport is gone; the reply is simply abandoned.
            return Ok(());
        };

        session
            .write_reply(OutboundReply { rid, data, error })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn second_respond_fails_loudly() {
        // A correlator with no live session still enforces the
        // at-most-once invariant; only the wire write is skipped.
        let correlator = ResponseCorrelator::new(Some(7), Weak::new());
        correlator.end(None).await.unwrap();
        let second = correlator.end(None).await;
        assert!(matches!(second, Err(CoreError::ResponseAlreadySent { rid: 7 })));
    }

    #[tokio::test]
    async fn correlator_without_rid_is_a_no_op() {
        let correlator = ResponseCorrelator::new(None, Weak::new());
        correlator.end(None).await.unwrap();
        correlator.end(None).await.unwrap();
    }

    #[test]
    fn weak_session_handle_does_not_keep_session_alive() {
        let weak: Weak<Session> = Weak::new();
        assert!(weak.upgrade().is_none());
        let _unused: Option<Arc<Session>> = None;
    }
}
