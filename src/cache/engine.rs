//! The cache instance: one store, one key generator, one clock.

use std::sync::Arc;

use axum::http::Method;
use serde::Serialize;
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::config::CacheConfig;
use super::entry::CacheEntry;
use super::error::CacheError;
use super::intercept::Intercepted;
use super::keys::{DefaultKeyGenerator, KeyGenerator, input_value};
use super::store::{CacheStore, MemoryStore};

/// State shared by a cache, its interceptors and every wrapper they hand out.
pub(crate) struct CacheCore<T> {
    store: Arc<dyn CacheStore<T>>,
    keys: Arc<dyn KeyGenerator>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    methods: Vec<Method>,
}

impl<T: Clone> CacheCore<T> {
    pub(crate) fn is_cacheable(&self, verb: &Method) -> bool {
        self.methods.contains(verb)
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    pub(crate) fn key_for<I: Serialize + ?Sized>(
        &self,
        verb: &Method,
        path: &str,
        input: Option<&I>,
    ) -> Result<String, CacheError> {
        let value = input_value(input)?;
        Ok(self.keys.generate(verb, path, value.as_ref()))
    }

    /// Live entry for `key`, or `None` on a miss or an expired entry.
    pub(crate) fn lookup(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        let Some(entry) = self.store.get(key)? else {
            return Ok(None);
        };
        if entry.is_stale_at(self.now()) {
            debug!(cache = "engine", outcome = "expired", key = %key, "cached entry expired");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Write `data` under `key`, stamped with the current time.
    ///
    /// When `not_before` is given the new `cached_at` is strictly later than it,
    /// even if the clock has not moved.
    pub(crate) fn write(
        &self,
        key: &str,
        data: T,
        not_before: Option<OffsetDateTime>,
    ) -> Result<CacheEntry<T>, CacheError> {
        let now = self.now();
        let cached_at = match not_before {
            Some(previous) if now <= previous => previous.saturating_add(Duration::NANOSECOND),
            _ => now,
        };
        let entry = CacheEntry::new(key, data, cached_at, self.ttl);
        self.store.set(key, entry.clone())?;
        Ok(entry)
    }

    pub(crate) fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.delete(key)?;
        debug!(cache = "engine", outcome = "invalidate", key = %key, "invalidated cache entry");
        Ok(())
    }
}

/// A configured response cache.
///
/// Cloning is cheap; clones share the same store.
pub struct ResponseCache<T> {
    core: Arc<CacheCore<T>>,
}

impl<T> Clone for ResponseCache<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> ResponseCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Cache with the default key generator, an in-memory LRU store and the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> ResponseCacheBuilder<T> {
        ResponseCacheBuilder {
            config,
            keys: None,
            store: None,
            clock: None,
        }
    }

    /// Wrap `origin` so that calls made through the result consult this cache.
    pub fn intercept<F>(&self, origin: F) -> Intercepted<T, F> {
        Intercepted::new(Arc::clone(&self.core), origin)
    }

    pub fn is_cacheable(&self, verb: &Method) -> bool {
        self.core.is_cacheable(verb)
    }

    pub fn ttl(&self) -> Duration {
        self.core.ttl
    }

    /// The key a call with these arguments is stored under.
    pub fn key_for<I: Serialize + ?Sized>(
        &self,
        verb: &Method,
        path: &str,
        input: Option<&I>,
    ) -> Result<String, CacheError> {
        self.core.key_for(verb, path, input)
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<(), CacheError> {
        self.core.store.clear()?;
        debug!(cache = "engine", outcome = "clear", "cleared cache");
        Ok(())
    }

    /// Drop the entry a call with these arguments would be served from.
    pub fn invalidate<I: Serialize + ?Sized>(
        &self,
        verb: &Method,
        path: &str,
        input: Option<&I>,
    ) -> Result<(), CacheError> {
        let key = self.core.key_for(verb, path, input)?;
        self.core.delete(&key)
    }

    /// Drop the entry stored under a literal key.
    pub fn invalidate_key(&self, key: &str) -> Result<(), CacheError> {
        self.core.delete(key)
    }

    /// Stored keys, least recently used first. Expired entries are included
    /// until they are overwritten or evicted.
    pub fn keys(&self) -> Result<Vec<String>, CacheError> {
        self.core.store.keys()
    }

    /// Stored entry for `key` when it is still live. Does not call any origin.
    pub fn peek(&self, key: &str) -> Result<Option<CacheEntry<T>>, CacheError> {
        self.core.lookup(key)
    }
}

/// Builder for [`ResponseCache`] with overridable collaborators.
pub struct ResponseCacheBuilder<T> {
    config: CacheConfig,
    keys: Option<Arc<dyn KeyGenerator>>,
    store: Option<Arc<dyn CacheStore<T>>>,
    clock: Option<Arc<dyn Clock>>,
}

impl<T> ResponseCacheBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn key_generator(mut self, keys: impl KeyGenerator + 'static) -> Self {
        self.keys = Some(Arc::new(keys));
        self
    }

    /// Use `store` instead of an in-memory store sized from the config.
    pub fn storage(mut self, store: Arc<dyn CacheStore<T>>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> ResponseCache<T> {
        let ttl = Duration::try_from(self.config.ttl).unwrap_or(Duration::MAX);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(self.config.max_size)));
        let keys = self
            .keys
            .unwrap_or_else(|| Arc::new(DefaultKeyGenerator));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        ResponseCache {
            core: Arc::new(CacheCore {
                store,
                keys,
                clock,
                ttl,
                methods: self.config.methods,
            }),
        }
    }
}
