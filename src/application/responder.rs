//! Correlation-keyed waiter registry for the synchronous rendezvous.
//!
//! The sync dispatch path registers a completion handle keyed by correlation
//! id; a consumer task feeds worker replies from the reply topic back into
//! the registry. Each id resolves at most once; replies for unknown or
//! already-resolved ids are discarded. The registry is process-local and
//! deliberately lost on restart.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::dispatch::ReplyMessage;
use crate::infra::broker::{Broker, BrokerError};

pub struct WorkerResponder {
    topic: String,
    pending: DashMap<Uuid, oneshot::Sender<ReplyMessage>>,
}

impl WorkerResponder {
    pub fn new(topic: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.into(),
            pending: DashMap::new(),
        })
    }

    /// Reply topic this responder listens on; advertised in sync dispatches.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Register a pending entry and hand back its completion handle.
    pub fn register(&self, correlation_id: Uuid) -> oneshot::Receiver<ReplyMessage> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id, tx);
        rx
    }

    /// Drop a pending entry without resolving it (publish failed).
    pub fn abandon(&self, correlation_id: &Uuid) {
        self.pending.remove(correlation_id);
    }

    /// Resolve the pending entry for a reply, at most once per id.
    pub fn resolve(&self, reply: ReplyMessage) {
        match self.pending.remove(&reply.correlation_id) {
            Some((id, sender)) => {
                if sender.send(reply).is_err() {
                    debug!(
                        target = "application::responder",
                        correlation_id = %id,
                        "requester gone before reply arrived"
                    );
                }
            }
            None => {
                metrics::counter!("kasha_reply_discarded_total").increment(1);
                debug!(
                    target = "application::responder",
                    correlation_id = %reply.correlation_id,
                    "discarding reply for unknown or already-resolved id"
                );
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consume the reply topic until the broker closes the subscription.
    pub async fn run<B>(self: Arc<Self>, broker: Arc<B>) -> Result<(), BrokerError>
    where
        B: Broker + ?Sized,
    {
        let mut replies = broker.subscribe(&self.topic).await?;

        while let Some(payload) = replies.recv().await {
            match serde_json::from_slice::<ReplyMessage>(&payload) {
                Ok(reply) => self.resolve(reply),
                Err(err) => {
                    warn!(
                        target = "application::responder",
                        error = %err,
                        "ignoring undecodable reply message"
                    );
                }
            }
        }

        Ok(())
    }

    /// Spawn the reply consumer as a detached task.
    pub fn spawn<B>(self: &Arc<Self>, broker: Arc<B>) -> tokio::task::JoinHandle<()>
    where
        B: Broker + ?Sized + 'static,
    {
        let responder = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = responder.run(broker).await {
                warn!(
                    target = "application::responder",
                    error = %err,
                    "reply consumer stopped"
                );
            }
        })
    }
}
