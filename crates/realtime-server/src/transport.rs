//! [`Transport`] backed by an axum WebSocket, the default framed
//! transport for a browser/agent-facing socket server.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use serde_json::Value;
use tokio::sync::Mutex;

use realtime_core::{CoreError, Transport};

pub struct AxumWsTransport {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

impl AxumWsTransport {
    pub fn new(sender: SplitSink<WebSocket, Message>) -> Arc<Self> {
        Arc::new(Self { sender: Mutex::new(sender) })
    }
}

#[async_trait]
impl Transport for AxumWsTransport {
    async fn send_object(&self, value: Value) -> Result<(), CoreError> {
        let text = serde_json::to_string(&value)
            .map_err(|e| CoreError::Internal(format!("failed to encode outbound frame: {e}")))?;
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }

    async fn close(&self, status: u16, reason: &str) {
        let frame = CloseFrame {
            code: status,
            reason: Cow::Owned(reason.to_string()),
        };
        let _ = self.sender.lock().await.send(Message::Close(Some(frame))).await;
    }
}
