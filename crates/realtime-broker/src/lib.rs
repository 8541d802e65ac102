//! Default in-process broker: a `channel -> subscriber set` index guarded
//! by a reader/writer lock, the same shape a market-data subscription
//! table uses, minus the wire fan-out (every subscriber here already
//! lives in this process as an [`OutboundSink`]).
//!
//! Swappable for a broker backed by Redis, NATS, or any other pub/sub
//! substrate that implements [`Broker`]; nothing in `realtime-core` or
//! `realtime-server` depends on this crate directly.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use realtime_core::{BindOutcome, Broker, CoreError, OutboundSink};

#[derive(Default)]
pub struct InProcessBroker {
    sinks: RwLock<HashMap<String, Arc<dyn OutboundSink>>>,
    subscribers_by_channel: RwLock<HashMap<String, HashSet<String>>>,
    channels_by_session: RwLock<HashMap<String, HashSet<String>>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers_by_channel
            .read()
            .get(channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn bind(&self, sink: Arc<dyn OutboundSink>) -> Result<BindOutcome, CoreError> {
        let session_id = sink.session_id().to_string();
        let previous = self.sinks.write().insert(session_id.clone(), sink);
        if previous.is_some() {
            // Not fatal -- the new sink already replaced the old one above --
            // but worth surfacing, since a second bind for the same session
            // id usually means a caller reused an id it shouldn't have.
            return Ok(BindOutcome {
                warning: Some(format!("session {session_id} was already bound; replacing its sink")),
            });
        }
        Ok(BindOutcome::default())
    }

    async fn unbind(&self, session_id: &str) {
        self.sinks.write().remove(session_id);
        let channels = self.channels_by_session.write().remove(session_id);
        if let Some(channels) = channels {
            let mut subscribers = self.subscribers_by_channel.write();
            for channel in channels {
                if let Some(set) = subscribers.get_mut(&channel) {
                    set.remove(session_id);
                    if set.is_empty() {
                        subscribers.remove(&channel);
                    }
                }
            }
        }
    }

    async fn subscribe(&self, session_id: &str, channel: &str) {
        self.subscribers_by_channel
            .write()
            .entry(channel.to_string())
            .or_default()
            .insert(session_id.to_string());
        self.channels_by_session
            .write()
            .entry(session_id.to_string())
            .or_default()
            .insert(channel.to_string());
    }

    async fn unsubscribe(&self, session_id: &str, channel: &str) {
        if let Some(set) = self.subscribers_by_channel.write().get_mut(channel) {
            set.remove(session_id);
        }
        if let Some(set) = self.channels_by_session.write().get_mut(session_id) {
            set.remove(channel);
        }
    }

    async fn publish(&self, channel: &str, data: Value) -> Result<(), CoreError> {
        let subscriber_ids: Vec<String> = self
            .subscribers_by_channel
            .read()
            .get(channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let sinks: Vec<Arc<dyn OutboundSink>> = {
            let guard = self.sinks.read();
            subscriber_ids
                .iter()
                .filter_map(|id| guard.get(id).cloned())
                .collect()
        };

        let deliveries = sinks.iter().map(|sink| sink.deliver(channel, data.clone()));
        futures::future::join_all(deliveries).await;

        Ok(())
    }

    async fn ready(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct RecordingSink {
        id: String,
        received: Arc<Mutex<Vec<(String, Value)>>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        fn session_id(&self) -> &str {
            &self.id
        }

        async fn deliver(&self, channel: &str, data: Value) {
            self.received.lock().await.push((channel.to_string(), data));
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_subscribed_sessions() {
        let broker = InProcessBroker::new();
        let received_a = Arc::new(Mutex::new(Vec::new()));
        let received_b = Arc::new(Mutex::new(Vec::new()));

        let sink_a: Arc<dyn OutboundSink> = Arc::new(RecordingSink { id: "a".into(), received: received_a.clone() });
        let sink_b: Arc<dyn OutboundSink> = Arc::new(RecordingSink { id: "b".into(), received: received_b.clone() });

        broker.bind(sink_a).await.unwrap();
        broker.bind(sink_b).await.unwrap();
        broker.subscribe("a", "chat").await;

        broker.publish("chat", serde_json::json!("hi")).await.unwrap();

        assert_eq!(received_a.lock().await.len(), 1);
        assert!(received_b.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rebinding_an_existing_session_reports_a_warning() {
        let broker = InProcessBroker::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink_one: Arc<dyn OutboundSink> = Arc::new(RecordingSink { id: "a".into(), received: received.clone() });
        let sink_two: Arc<dyn OutboundSink> = Arc::new(RecordingSink { id: "a".into(), received: received.clone() });

        let first = broker.bind(sink_one).await.unwrap();
        assert!(first.warning.is_none());

        let second = broker.bind(sink_two).await.unwrap();
        assert!(second.warning.is_some());
    }

    #[tokio::test]
    async fn unbind_removes_all_subscriptions() {
        let broker = InProcessBroker::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn OutboundSink> = Arc::new(RecordingSink { id: "a".into(), received: received.clone() });

        broker.bind(sink).await.unwrap();
        broker.subscribe("a", "chat").await;
        broker.unbind("a").await;

        assert_eq!(broker.subscriber_count("chat"), 0);
        broker.publish("chat", serde_json::json!("hi")).await.unwrap();
        assert!(received.lock().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_deliveries() {
        let broker = InProcessBroker::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink: Arc<dyn OutboundSink> = Arc::new(RecordingSink { id: "a".into(), received: received.clone() });

        broker.bind(sink).await.unwrap();
        broker.subscribe("a", "chat").await;
        broker.unsubscribe("a", "chat").await;

        broker.publish("chat", serde_json::json!("hi")).await.unwrap();
        assert!(received.lock().await.is_empty());
    }
}
