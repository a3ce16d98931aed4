//! The result object handed back for cacheable calls.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use time::OffsetDateTime;
use tracing::debug;

use super::engine::CacheCore;
use super::entry::{CacheEntry, is_stale};
use super::error::CacheError;
use super::intercept::Fetch;

const METRIC_REFRESH: &str = "callcache_refresh_total";

/// Ties a wrapper to the key and the origin call it was produced by.
pub(crate) struct Binding<T, E> {
    core: Arc<CacheCore<T>>,
    key: String,
    fetch: Fetch<T, E>,
}

impl<T, E> Binding<T, E> {
    pub(crate) fn new(core: Arc<CacheCore<T>>, key: String, fetch: Fetch<T, E>) -> Self {
        Self { core, key, fetch }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) async fn fetch(&self) -> Result<T, E> {
        (self.fetch)().await
    }
}

/// A snapshot of one cache entry plus the means to refresh or drop it.
///
/// `data` and the timestamps are fixed when the wrapper is built; later
/// writes to the same key are not reflected. Staleness is computed on every
/// call to [`Cached::is_stale`].
pub struct Cached<T, E> {
    data: T,
    cached_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    binding: Arc<Binding<T, E>>,
}

impl<T, E> Cached<T, E> {
    pub(crate) fn build(entry: CacheEntry<T>, binding: Arc<Binding<T, E>>) -> Self {
        Self {
            data: entry.data,
            cached_at: entry.cached_at,
            expires_at: entry.expires_at,
            binding,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn cached_at(&self) -> OffsetDateTime {
        self.cached_at
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    pub fn key(&self) -> &str {
        self.binding.key()
    }
}

impl<T: Clone, E> Cached<T, E> {
    pub fn is_stale(&self) -> bool {
        is_stale(self.binding.core.now(), self.expires_at)
    }

    /// Call the origin again, skipping the cache, and store the new result.
    ///
    /// Returns a new wrapper; `self` keeps its snapshot. If the origin fails
    /// the stored entry is left as it was.
    pub async fn refresh(&self) -> Result<Self, E>
    where
        E: From<CacheError>,
    {
        let data = self.binding.fetch().await?;
        let entry = self
            .binding
            .core
            .write(self.binding.key(), data, Some(self.cached_at))?;

        debug!(
            cache = "wrapper",
            outcome = "refresh",
            key = %self.binding.key(),
            "refreshed cached entry"
        );
        counter!(METRIC_REFRESH).increment(1);
        Ok(Self::build(entry, Arc::clone(&self.binding)))
    }

    /// Remove the stored entry for this key. Wrappers already handed out keep
    /// their data.
    pub fn invalidate(&self) -> Result<(), CacheError> {
        self.binding.core.delete(self.binding.key())
    }
}

impl<T: fmt::Debug, E> fmt::Debug for Cached<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("key", &self.binding.key)
            .field("data", &self.data)
            .field("cached_at", &self.cached_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::http::Method;
    use time::Duration;

    use super::*;
    use crate::cache::{CacheConfig, CallContext, ManualClock, ResponseCache};

    #[derive(Debug, thiserror::Error)]
    enum OriginError {
        #[error("origin unavailable")]
        Unavailable,
        #[error(transparent)]
        Cache(#[from] CacheError),
    }

    fn five_second_cache(clock: &Arc<ManualClock>) -> ResponseCache<u32> {
        ResponseCache::builder(CacheConfig::default().with_ttl(std::time::Duration::from_secs(5)))
            .clock(clock.clone())
            .build()
    }

    #[tokio::test]
    async fn staleness_flips_without_touching_the_cache() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let cache = five_second_cache(&clock);
        let origin = cache.intercept(|_: Option<()>, _: CallContext| async {
            Ok::<_, OriginError>(1_u32)
        });

        let wrapper = origin
            .call(Method::GET, "/n", None)
            .await
            .expect("call")
            .into_cached()
            .expect("cached");

        clock.advance(Duration::seconds(5));
        assert!(!wrapper.is_stale());
        clock.advance(Duration::NANOSECOND);
        assert!(wrapper.is_stale());
    }

    #[tokio::test]
    async fn refresh_returns_new_wrapper_and_keeps_old_snapshot() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let cache = five_second_cache(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let origin = cache.intercept(move |_: Option<()>, _: CallContext| {
            let n = counter.fetch_add(1, Ordering::SeqCst) as u32 + 1;
            async move { Ok::<_, OriginError>(n) }
        });

        let first = origin
            .call(Method::GET, "/n", None)
            .await
            .expect("call")
            .into_cached()
            .expect("cached");
        let refreshed = first.refresh().await.expect("refresh");

        assert_eq!(*first.data(), 1);
        assert_eq!(*refreshed.data(), 2);
        assert!(refreshed.cached_at() > first.cached_at());
        assert_eq!(refreshed.key(), first.key());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let served = origin.call(Method::GET, "/n", None).await.expect("call");
        assert_eq!(*served.data(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let cache = five_second_cache(&clock);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let origin = cache.intercept(move |_: Option<()>, _: CallContext| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Ok(10_u32)
                } else {
                    Err(OriginError::Unavailable)
                }
            }
        });

        let first = origin
            .call(Method::GET, "/n", None)
            .await
            .expect("call")
            .into_cached()
            .expect("cached");
        let err = first.refresh().await.expect_err("refresh fails");
        assert!(matches!(err, OriginError::Unavailable));

        let served = origin.call(Method::GET, "/n", None).await.expect("call");
        assert_eq!(*served.data(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_drops_entry_but_not_snapshot() {
        let clock = Arc::new(ManualClock::at_unix(0));
        let cache = five_second_cache(&clock);
        let origin = cache.intercept(|_: Option<()>, _: CallContext| async {
            Ok::<_, OriginError>(7_u32)
        });

        let wrapper = origin
            .call(Method::GET, "/n", None)
            .await
            .expect("call")
            .into_cached()
            .expect("cached");
        wrapper.invalidate().expect("invalidate");

        assert!(cache.keys().expect("keys").is_empty());
        assert_eq!(*wrapper.data(), 7);
        assert_eq!(wrapper.cached_at().unix_timestamp(), 0);
    }
}
