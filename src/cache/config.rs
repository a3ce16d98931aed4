//! Cache configuration.
//!
//! Controls the TTL, the cacheable verbs and the LRU bound of one
//! [`ResponseCache`](super::ResponseCache).

use std::num::NonZeroUsize;
use std::time::Duration;

use axum::http::Method;

// Default values for cache configuration
const DEFAULT_TTL_SECS: u64 = 300;
const DEFAULT_RESPONSE_BODY_LIMIT_BYTES: usize = 1024 * 1024;

/// Per-instance cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of an entry from the moment it is written.
    pub ttl: Duration,
    /// Verbs whose calls go through the cache; everything else bypasses it.
    pub methods: Vec<Method>,
    /// Maximum entries in the default store. `None` keeps every key.
    pub max_size: Option<NonZeroUsize>,
    /// Largest response body the HTTP adapter will buffer for caching.
    pub response_body_limit_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            methods: vec![Method::GET],
            max_size: None,
            response_body_limit_bytes: DEFAULT_RESPONSE_BODY_LIMIT_BYTES,
        }
    }
}

impl CacheConfig {
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    pub fn with_max_size(mut self, max_size: NonZeroUsize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn with_response_body_limit(mut self, bytes: usize) -> Self {
        self.response_body_limit_bytes = bytes;
        self
    }

    /// Returns true if calls with `verb` are served through the cache.
    pub fn is_cacheable(&self, verb: &Method) -> bool {
        self.methods.contains(verb)
    }
}
