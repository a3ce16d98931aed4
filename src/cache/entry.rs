use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// A stored result together with the instants that bound its lifetime.
///
/// `expires_at` is fixed when the entry is written. Refreshing produces a new
/// entry rather than touching an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub data: T,
    #[serde(with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl<T> CacheEntry<T> {
    pub fn new(key: impl Into<String>, data: T, cached_at: OffsetDateTime, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            data,
            cached_at,
            expires_at: cached_at.saturating_add(ttl),
        }
    }

    pub fn is_stale_at(&self, now: OffsetDateTime) -> bool {
        is_stale(now, self.expires_at)
    }
}

/// An entry is stale strictly after its expiry instant.
pub fn is_stale(now: OffsetDateTime, expires_at: OffsetDateTime) -> bool {
    now > expires_at
}
