//! Cache-freshness state machine.
//!
//! Given the stored snapshot (or its absence) and the current time, decide
//! whether to serve, wait on the in-flight render, or dispatch a new one.
//! The decision ladder is fixed; the first applicable branch wins.

use std::time::Duration;

use time::OffsetDateTime;

use crate::application::poll::lock_is_abandoned;
use crate::domain::snapshot::SnapshotDoc;
use crate::domain::status::CacheStatus;

/// Freshness policy constants the ladder runs under.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessPolicy {
    /// How long a held lock stays credible before it counts as abandoned.
    pub lock_timeout: Duration,
    /// Refresh-ahead horizon: a servable doc this close to private expiry
    /// gets a background refresh.
    pub refresh_ahead: Duration,
}

/// What to do for one request, given the stored state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Publish a render job carrying this cache status.
    Dispatch { cache_status: CacheStatus },
    /// A credible render is in flight; wait on its lock.
    AwaitLock { token: String },
    /// The stored doc is servable as-is.
    Serve {
        cache_status: CacheStatus,
        /// Fire a non-blocking refresh dispatch to extend freshness.
        background_refresh: bool,
    },
}

/// Run the decision ladder.
///
/// Branch order:
/// 1. no doc → dispatch (`BYPASS` when `refresh` was requested, else `MISS`)
/// 2. an abandoned lock is cleared locally before anything else looks at it
/// 3. `refresh` with no credible lock → dispatch `BYPASS`
/// 4. rendered doc within shared freshness (or origin marked unavailable) →
///    serve `HIT`/`STALE`/`UPDATING`, with a background refresh when close
///    to private expiry or past shared expiry
/// 5. credible lock → wait on it
/// 6. otherwise dispatch (`EXPIRED` if ever rendered, else `MISS`)
pub fn classify(
    doc: Option<&SnapshotDoc>,
    now: OffsetDateTime,
    refresh: bool,
    service_unavailable: bool,
    policy: &FreshnessPolicy,
) -> Decision {
    let Some(doc) = doc else {
        return Decision::Dispatch {
            cache_status: if refresh {
                CacheStatus::Bypass
            } else {
                CacheStatus::Miss
            },
        };
    };

    let lock = doc
        .lock
        .as_deref()
        .filter(|_| !lock_is_abandoned(doc.updated_at, now, policy.lock_timeout));

    if refresh && lock.is_none() {
        return Decision::Dispatch {
            cache_status: CacheStatus::Bypass,
        };
    }

    if !refresh && doc.has_rendered() && (doc.shared_fresh(now) || service_unavailable) {
        let near_private_expiry = doc
            .private_expires
            .is_some_and(|t| t < now + policy.refresh_ahead);
        let background_refresh = !service_unavailable
            && lock.is_none()
            && (near_private_expiry || doc.shared_expired(now));

        let cache_status = if doc.private_fresh(now) {
            CacheStatus::Hit
        } else if doc.error.is_some() {
            CacheStatus::Stale
        } else {
            CacheStatus::Updating
        };

        return Decision::Serve {
            cache_status,
            background_refresh,
        };
    }

    if let Some(token) = lock {
        return Decision::AwaitLock {
            token: token.to_string(),
        };
    }

    Decision::Dispatch {
        cache_status: if doc.has_rendered() {
            CacheStatus::Expired
        } else {
            CacheStatus::Miss
        },
    }
}

/// Cache status reported after a successful lock wait.
pub fn status_after_wait(refresh: bool, had_status: bool) -> CacheStatus {
    if refresh {
        CacheStatus::Bypass
    } else if had_status {
        CacheStatus::Expired
    } else {
        CacheStatus::Miss
    }
}
