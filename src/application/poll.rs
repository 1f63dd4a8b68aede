//! Lock/poll coordinator.
//!
//! Fleet-wide mutual exclusion on one cache key lives entirely in the stored
//! `lock` field; waiting is a bounded poll loop against the document store.
//! A crashed worker is handled by treating locks older than the timeout as
//! abandoned.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::application::error::RestError;
use crate::domain::snapshot::{CacheKey, SnapshotDoc};
use crate::infra::store::DocumentStore;

/// Whether a held lock has outlived the timeout relative to its recorded
/// acquisition time. A lock without a recorded time is given the benefit of
/// the doubt; the bounded wait still caps the damage.
pub fn lock_is_abandoned(
    updated_at: Option<OffsetDateTime>,
    now: OffsetDateTime,
    timeout: Duration,
) -> bool {
    updated_at.is_some_and(|acquired| acquired + timeout < now)
}

/// Poll the store until the lock token changes or clears, returning the
/// refreshed doc, or fail `CACHE_LOCK_TIMEOUT` once the deadline passes.
///
/// This is a plain async loop: dropping the future cancels the wait without
/// leaking a polling task.
pub async fn await_release<S>(
    store: &S,
    key: &CacheKey,
    token: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<SnapshotDoc, RestError>
where
    S: DocumentStore + ?Sized,
{
    let deadline = Instant::now() + timeout;

    loop {
        if Instant::now() >= deadline {
            metrics::counter!("kasha_lock_wait_timeout_total").increment(1);
            debug!(target = "application::poll", key = %key, "lock wait timed out");
            return Err(RestError::CacheLockTimeout);
        }

        sleep(interval).await;

        let doc = store
            .find_one(key)
            .await
            .map_err(|err| RestError::internal(&err))?;

        match doc {
            Some(doc) if doc.lock.as_deref() != Some(token) => {
                debug!(target = "application::poll", key = %key, "lock released");
                return Ok(doc);
            }
            // Still locked by the same render, or the doc vanished mid-wait;
            // keep polling until the deadline.
            _ => {}
        }
    }
}
