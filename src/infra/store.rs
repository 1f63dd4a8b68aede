//! Document store contract.
//!
//! The store is the single source of truth for both cache content and lock
//! state. This core only reads; all writes to `status`/`lock`/expiry fields
//! are performed by render workers. The storage engine itself is external;
//! only the query contract matters here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::snapshot::{CacheKey, SnapshotDoc};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Look up the snapshot for one cache key.
    async fn find_one(&self, key: &CacheKey) -> Result<Option<SnapshotDoc>, StoreError>;
}

/// In-memory store for tests and embedded setups. Writes happen through
/// [`MemoryStore::put`], standing in for the workers' store updates.
#[derive(Clone, Default)]
pub struct MemoryStore {
    docs: Arc<RwLock<HashMap<CacheKey, SnapshotDoc>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, doc: SnapshotDoc) {
        self.docs.write().await.insert(doc.key(), doc);
    }

    pub async fn remove(&self, key: &CacheKey) {
        self.docs.write().await.remove(key);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_one(&self, key: &CacheKey) -> Result<Option<SnapshotDoc>, StoreError> {
        Ok(self.docs.read().await.get(key).cloned())
    }
}
