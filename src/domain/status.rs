//! Cache status labels attached to every served or dispatched result.

use serde::{Deserialize, Serialize};

/// Outcome label for one resolved request.
///
/// Exactly one applies per request; it drives response headers and callback
/// metadata and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Snapshot served within its private freshness window.
    Hit,
    /// Snapshot served past private expiry; the last refresh attempt failed.
    Stale,
    /// Snapshot served past private expiry while a refresh is pending.
    Updating,
    /// Snapshot existed but was past shared expiry; a render was required.
    Expired,
    /// No snapshot existed for the key.
    Miss,
    /// A fresh render was forced regardless of freshness.
    Bypass,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Updating => "UPDATING",
            CacheStatus::Expired => "EXPIRED",
            CacheStatus::Miss => "MISS",
            CacheStatus::Bypass => "BYPASS",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
