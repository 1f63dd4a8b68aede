//! Rendezvous correctness: correlation ids resolve at most once, publish
//! failures leave no pending entries, and stray replies disturb nothing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use kasha::application::dispatch::{DispatchMessage, Dispatcher, ReplyMessage};
use kasha::application::responder::WorkerResponder;
use kasha::config::BrokerSettings;
use kasha::domain::snapshot::SnapshotDoc;
use kasha::domain::status::CacheStatus;
use kasha::infra::broker::{Broker, BrokerError, MemoryBroker};

fn job() -> DispatchMessage {
    DispatchMessage {
        site: "https://example.com".to_string(),
        path: "/page".to_string(),
        profile: None,
        user_agent: None,
        rewrites: None,
        callback_url: None,
        meta_only: false,
        cache_status: Some(CacheStatus::Miss),
        reply_to: None,
        correlation_id: None,
    }
}

fn reply_for(job: &DispatchMessage) -> ReplyMessage {
    ReplyMessage {
        correlation_id: job.correlation_id.unwrap(),
        doc: SnapshotDoc {
            site: job.site.clone(),
            path: job.path.clone(),
            status: Some(200),
            html: Some("<html>ok</html>".to_string()),
            ..SnapshotDoc::default()
        },
        cache_status: job.cache_status,
    }
}

#[tokio::test]
async fn sync_dispatch_resolves_on_the_matching_reply() {
    let broker = Arc::new(MemoryBroker::new());
    let responder = WorkerResponder::new("kasha-reply");
    responder.spawn(Arc::clone(&broker));
    sleep(Duration::from_millis(10)).await;

    let dispatcher = Dispatcher::new(
        Arc::clone(&broker),
        Arc::clone(&responder),
        BrokerSettings::default(),
    );

    let mut jobs = broker.subscribe("kasha-sync-queue").await.unwrap();
    let worker_broker = Arc::clone(&broker);
    tokio::spawn(async move {
        let payload = jobs.recv().await.unwrap();
        let job: DispatchMessage = serde_json::from_slice(&payload).unwrap();
        let reply = reply_for(&job);
        worker_broker
            .publish(
                job.reply_to.as_deref().unwrap(),
                serde_json::to_vec(&reply).unwrap(),
            )
            .await
            .unwrap();
    });

    let reply = timeout(Duration::from_secs(1), dispatcher.dispatch_sync(&job()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.doc.status, Some(200));
    assert_eq!(reply.cache_status, Some(CacheStatus::Miss));
    assert_eq!(responder.pending_len(), 0);
}

#[tokio::test]
async fn late_duplicate_reply_is_discarded() {
    let broker = Arc::new(MemoryBroker::new());
    let responder = WorkerResponder::new("kasha-reply");
    responder.spawn(Arc::clone(&broker));
    sleep(Duration::from_millis(10)).await;

    let dispatcher = Dispatcher::new(
        Arc::clone(&broker),
        Arc::clone(&responder),
        BrokerSettings::default(),
    );

    let mut jobs = broker.subscribe("kasha-sync-queue").await.unwrap();
    let worker_broker = Arc::clone(&broker);
    tokio::spawn(async move {
        let payload = jobs.recv().await.unwrap();
        let job: DispatchMessage = serde_json::from_slice(&payload).unwrap();
        let encoded = serde_json::to_vec(&reply_for(&job)).unwrap();
        let topic = job.reply_to.unwrap();
        worker_broker.publish(&topic, encoded.clone()).await.unwrap();
        worker_broker.publish(&topic, encoded).await.unwrap();
    });

    let reply = timeout(Duration::from_secs(1), dispatcher.dispatch_sync(&job()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply.doc.status, Some(200));

    // The duplicate resolves nothing and leaves no pending entry behind.
    sleep(Duration::from_millis(50)).await;
    assert_eq!(responder.pending_len(), 0);
}

#[tokio::test]
async fn reply_for_an_unknown_id_disturbs_nothing() {
    let broker = Arc::new(MemoryBroker::new());
    let responder = WorkerResponder::new("kasha-reply");
    responder.spawn(Arc::clone(&broker));
    sleep(Duration::from_millis(10)).await;

    let stray = ReplyMessage {
        correlation_id: uuid::Uuid::new_v4(),
        doc: SnapshotDoc::default(),
        cache_status: None,
    };
    broker
        .publish("kasha-reply", serde_json::to_vec(&stray).unwrap())
        .await
        .unwrap();

    sleep(Duration::from_millis(50)).await;
    assert_eq!(responder.pending_len(), 0);
}

/// Broker whose publishes always fail; subscriptions hand out a channel that
/// never receives anything.
struct BrokenBroker;

#[async_trait]
impl Broker for BrokenBroker {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), BrokerError> {
        Err(BrokerError::Publish("connection lost".to_string()))
    }

    async fn subscribe(&self, _topic: &str) -> Result<mpsc::Receiver<Vec<u8>>, BrokerError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }
}

#[tokio::test]
async fn failed_publish_abandons_the_pending_entry() {
    let broker = Arc::new(BrokenBroker);
    let responder = WorkerResponder::new("kasha-reply");
    let dispatcher = Dispatcher::new(
        Arc::clone(&broker),
        Arc::clone(&responder),
        BrokerSettings::default(),
    );

    let err = dispatcher.dispatch_sync(&job()).await.unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");
    assert_eq!(responder.pending_len(), 0);
}
