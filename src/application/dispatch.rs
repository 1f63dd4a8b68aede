//! Worker dispatch protocol.
//!
//! Jobs are published to the broker in one of two modes: fire-and-forget on
//! the async topic (`noWait` or a callback URL present), or a synchronous
//! rendezvous on the sync topic, where the caller suspends until a matching
//! reply arrives on the reply topic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::application::error::RestError;
use crate::application::responder::WorkerResponder;
use crate::config::BrokerSettings;
use crate::domain::site::RewriteRule;
use crate::domain::snapshot::{CacheKey, SnapshotDoc};
use crate::domain::status::CacheStatus;
use crate::infra::broker::Broker;

/// One render job, as published to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub site: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrites: Option<Vec<RewriteRule>>,
    #[serde(rename = "callbackURL", skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    pub meta_only: bool,
    /// Status computed at dispatch time; absent for background refreshes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<CacheStatus>,
    /// Reply topic, set for synchronous dispatch only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl DispatchMessage {
    pub fn key(&self) -> CacheKey {
        CacheKey {
            site: self.site.clone(),
            path: self.path.clone(),
            profile: self.profile.clone(),
        }
    }
}

/// A finished render coming back on the reply topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyMessage {
    pub correlation_id: Uuid,
    pub doc: SnapshotDoc,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_status: Option<CacheStatus>,
}

/// Publishes render jobs and runs the synchronous rendezvous.
pub struct Dispatcher<B> {
    broker: Arc<B>,
    responder: Arc<WorkerResponder>,
    topics: BrokerSettings,
}

impl<B: Broker> Dispatcher<B> {
    pub fn new(broker: Arc<B>, responder: Arc<WorkerResponder>, topics: BrokerSettings) -> Self {
        Self {
            broker,
            responder,
            topics,
        }
    }

    /// Publish to the async topic and resolve immediately.
    pub async fn dispatch_async(&self, message: &DispatchMessage) -> Result<(), RestError> {
        let payload = encode(message)?;

        debug!(
            target = "application::dispatch",
            topic = self.topics.async_topic,
            key = %message.key(),
            cache_status = ?message.cache_status,
            "dispatching render job"
        );

        self.broker
            .publish(&self.topics.async_topic, payload)
            .await
            .map_err(|err| RestError::internal(&err))?;

        metrics::counter!("kasha_dispatch_total", "mode" => "async").increment(1);
        Ok(())
    }

    /// Publish to the sync topic and suspend until the matching reply.
    ///
    /// The pending entry is registered before publishing so a fast reply
    /// cannot race the registration; it is abandoned if the publish fails.
    pub async fn dispatch_sync(&self, message: &DispatchMessage) -> Result<ReplyMessage, RestError> {
        let correlation_id = Uuid::new_v4();
        let mut message = message.clone();
        message.reply_to = Some(self.responder.topic().to_string());
        message.correlation_id = Some(correlation_id);

        let payload = encode(&message)?;
        let receiver = self.responder.register(correlation_id);

        debug!(
            target = "application::dispatch",
            topic = self.topics.sync_topic,
            key = %message.key(),
            correlation_id = %correlation_id,
            "dispatching render job with rendezvous"
        );

        if let Err(err) = self.broker.publish(&self.topics.sync_topic, payload).await {
            self.responder.abandon(&correlation_id);
            return Err(RestError::internal(&err));
        }

        metrics::counter!("kasha_dispatch_total", "mode" => "sync").increment(1);

        // No caller-side timeout: workers are trusted to reply or let their
        // lock expire. If this future is dropped, the eventual reply resolves
        // into a closed channel and is discarded.
        receiver.await.map_err(|err| RestError::internal(&err))
    }
}

fn encode(message: &DispatchMessage) -> Result<Vec<u8>, RestError> {
    serde_json::to_vec(message).map_err(|err| RestError::internal(&err))
}
