//! Job broker contract: generic pub/sub with named topics.
//!
//! Render jobs are published to an async- or sync-delivery topic; finished
//! renders come back on a reply topic. Publish failures surface
//! synchronously to the caller; delivery downstream is at-least-once.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker publish failed: {0}")]
    Publish(String),
    #[error("broker subscribe failed: {0}")]
    Subscribe(String),
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError>;

    /// Subscribe to a topic, receiving raw message payloads.
    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, BrokerError>;
}

const SUBSCRIPTION_BUFFER: usize = 64;

/// In-process broker for tests and single-node setups: every subscriber of a
/// topic receives every message published to it.
#[derive(Default)]
pub struct MemoryBroker {
    topics: DashMap<String, Vec<mpsc::Sender<Vec<u8>>>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        // Clone the sender list out before any send: awaiting while holding
        // the map guard would block every other operation on this shard.
        let senders: Vec<mpsc::Sender<Vec<u8>>> = match self.topics.get(topic) {
            Some(entry) => entry.clone(),
            // No subscriber yet; at-least-once delivery starts at subscription.
            None => return Ok(()),
        };

        let mut saw_closed = false;
        for sender in &senders {
            if sender.send(payload.clone()).await.is_err() {
                saw_closed = true;
            }
        }

        if saw_closed {
            if let Some(mut entry) = self.topics.get_mut(topic) {
                entry.retain(|sender| !sender.is_closed());
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, BrokerError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(rx)
    }
}
