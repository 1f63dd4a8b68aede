//! Stored snapshot documents and their client-facing normalized shape.
//!
//! Snapshots are written exclusively by render workers; this core only reads
//! them and re-triggers work. Timestamp comparisons treat an absent boundary
//! as "not satisfied" on either side, matching how partially-written docs
//! behave in the store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// HTTP statuses a stored snapshot may be served with. Anything else is a
/// renderer artifact the fallback path must not trust.
pub const VALID_HTTP_STATUS: &[u16] = &[
    200, 201, 202, 203, 204, 206, 301, 302, 303, 307, 308, 400, 401, 403, 404, 405, 406, 410, 451,
];

pub fn is_valid_http_status(status: Option<u16>) -> bool {
    status.is_some_and(|code| VALID_HTTP_STATUS.contains(&code))
}

/// Identity of one cache entry: URL origin, canonical path, profile name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub site: String,
    pub path: String,
    pub profile: Option<String>,
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} ({})",
            self.site,
            self.path,
            self.profile.as_deref().unwrap_or("-")
        )
    }
}

/// One persisted render result, keyed by [`CacheKey`].
///
/// `status` stays absent until at least one render has completed. `error`
/// and `status` may coexist: a stale-but-served doc whose latest refresh
/// failed keeps both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotDoc {
    pub site: String,
    pub path: String,
    pub profile: Option<String>,
    /// HTTP status of the last successful render.
    pub status: Option<u16>,
    pub redirect: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub open_graph: Option<serde_json::Value>,
    pub links: Option<Vec<String>>,
    pub html: Option<String>,
    pub static_html: Option<String>,
    /// Last render failure code, if any.
    pub error: Option<String>,
    /// Opaque token a worker holds while a render is in flight.
    pub lock: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub private_expires: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub shared_expires: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl SnapshotDoc {
    pub fn key(&self) -> CacheKey {
        CacheKey {
            site: self.site.clone(),
            path: self.path.clone(),
            profile: self.profile.clone(),
        }
    }

    /// Whether at least one render has ever completed for this key.
    pub fn has_rendered(&self) -> bool {
        self.status.is_some()
    }

    /// Within the per-request freshness boundary.
    pub fn private_fresh(&self, now: OffsetDateTime) -> bool {
        self.private_expires.is_some_and(|t| t >= now)
    }

    /// Within the broader freshness boundary.
    pub fn shared_fresh(&self, now: OffsetDateTime) -> bool {
        self.shared_expires.is_some_and(|t| t >= now)
    }

    /// Strictly past private expiry. Absent boundaries do not count as past.
    pub fn private_expired(&self, now: OffsetDateTime) -> bool {
        self.private_expires.is_some_and(|t| t < now)
    }

    /// Strictly past shared expiry. Absent boundaries do not count as past.
    pub fn shared_expired(&self, now: OffsetDateTime) -> bool {
        self.shared_expires.is_some_and(|t| t < now)
    }
}

/// Client-facing shape of a snapshot: the rendered payload and freshness
/// metadata, without store internals such as the lock token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSnapshot {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_graph: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_html: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_expires: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_expires: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<OffsetDateTime>,
}

/// Strip store internals from a snapshot for delivery. `meta_only` drops the
/// payload bodies and keeps metadata, redirect target, and link graph.
pub fn normalize(doc: &SnapshotDoc, meta_only: bool) -> NormalizedSnapshot {
    NormalizedSnapshot {
        url: format!("{}{}", doc.site, doc.path),
        profile: doc.profile.clone(),
        status: doc.status,
        redirect: doc.redirect.clone(),
        meta: doc.meta.clone(),
        open_graph: doc.open_graph.clone(),
        links: doc.links.clone(),
        html: if meta_only { None } else { doc.html.clone() },
        static_html: if meta_only {
            None
        } else {
            doc.static_html.clone()
        },
        private_expires: doc.private_expires,
        shared_expires: doc.shared_expires,
        updated_at: doc.updated_at,
    }
}
