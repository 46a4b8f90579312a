//! Best-effort command channel — live config pushes to running instances.
//!
//! Delivery is at-most-once with no guarantee: if the instance is not
//! subscribed (mid-restart, crashed), the envelope is lost. Callers that
//! need guaranteed application persist the change durably and let the
//! instance re-read it on next start; this channel only shaves latency.

use std::collections::HashMap;
use std::sync::Mutex;

use sendhive_core::types::CommandEnvelope;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const TOPIC_CAPACITY: usize = 16;

/// Per-account pub/sub topics.
#[derive(Default)]
pub struct CommandChannel {
    topics: Mutex<HashMap<String, broadcast::Sender<CommandEnvelope>>>,
}

impl CommandChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish to the account's topic. Returns how many subscribers the
    /// envelope reached — zero means it was dropped on the floor, which is
    /// within contract.
    pub fn publish(&self, account_id: &str, envelope: CommandEnvelope) -> usize {
        let topics = match self.topics.lock() {
            Ok(topics) => topics,
            Err(_) => return 0,
        };
        let reached = topics
            .get(account_id)
            .and_then(|tx| tx.send(envelope).ok())
            .unwrap_or(0);
        if reached == 0 {
            tracing::debug!("Command for {} lost (no subscriber)", account_id);
        }
        reached
    }

    /// Subscribe to the account's topic, creating it on first use.
    pub fn subscribe(&self, account_id: &str) -> BroadcastStream<CommandEnvelope> {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        let tx = topics
            .entry(account_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0);
        BroadcastStream::new(tx.subscribe())
    }

    /// Drop the topic entirely (account deleted).
    pub fn drop_topic(&self, account_id: &str) {
        if let Ok(mut topics) = self.topics.lock() {
            topics.remove(account_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_publish_without_subscriber_is_lost() {
        let chan = CommandChannel::new();
        let env = CommandEnvelope::new("update_config", serde_json::json!({"enabled": false}));
        assert_eq!(chan.publish("acc-1", env), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_envelope() {
        let chan = CommandChannel::new();
        let mut stream = chan.subscribe("acc-1");

        let env = CommandEnvelope::new("update_config", serde_json::json!({"hourly": 10}));
        assert_eq!(chan.publish("acc-1", env), 1);

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.command, "update_config");
        assert_eq!(received.payload["hourly"], 10);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let chan = CommandChannel::new();
        let _stream_a = chan.subscribe("acc-a");
        let mut stream_b = chan.subscribe("acc-b");

        chan.publish("acc-b", CommandEnvelope::new("restart", serde_json::Value::Null));
        let received = stream_b.next().await.unwrap().unwrap();
        assert_eq!(received.command, "restart");
    }

    #[tokio::test]
    async fn test_drop_topic() {
        let chan = CommandChannel::new();
        let _stream = chan.subscribe("acc-1");
        chan.drop_topic("acc-1");
        // topic gone → publish reaches nobody
        assert_eq!(
            chan.publish("acc-1", CommandEnvelope::new("noop", serde_json::Value::Null)),
            0
        );
    }
}
