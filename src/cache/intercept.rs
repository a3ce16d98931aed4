//! Per-call cache orchestration.

use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::counter;
use serde::Serialize;
use tracing::{debug, instrument};

use super::engine::CacheCore;
use super::error::CacheError;
use super::wrapper::{Binding, Cached};

const METRIC_HIT: &str = "callcache_hit_total";
const METRIC_MISS: &str = "callcache_miss_total";
const METRIC_BYPASS: &str = "callcache_bypass_total";

/// Re-runs the origin with the arguments of one call.
pub(crate) type Fetch<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// What the origin is told about the call it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub verb: Method,
    pub path: String,
}

/// Outcome of an intercepted call.
#[derive(Debug)]
pub enum Dispatch<T, E> {
    /// The verb is cacheable; the result is served through the cache.
    Cached(Cached<T, E>),
    /// The verb is not cacheable; the origin's result is returned as is.
    Bypassed(T),
}

impl<T, E> Dispatch<T, E> {
    pub fn data(&self) -> &T {
        match self {
            Self::Cached(cached) => cached.data(),
            Self::Bypassed(data) => data,
        }
    }

    pub fn into_data(self) -> T {
        match self {
            Self::Cached(cached) => cached.into_data(),
            Self::Bypassed(data) => data,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }

    pub fn as_cached(&self) -> Option<&Cached<T, E>> {
        match self {
            Self::Cached(cached) => Some(cached),
            Self::Bypassed(_) => None,
        }
    }

    pub fn into_cached(self) -> Option<Cached<T, E>> {
        match self {
            Self::Cached(cached) => Some(cached),
            Self::Bypassed(_) => None,
        }
    }
}

/// An origin operation bound to a cache.
pub struct Intercepted<T, F> {
    core: Arc<CacheCore<T>>,
    origin: Arc<F>,
}

impl<T, F> Clone for Intercepted<T, F> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            origin: Arc::clone(&self.origin),
        }
    }
}

impl<T, F> Intercepted<T, F>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(core: Arc<CacheCore<T>>, origin: F) -> Self {
        Self {
            core,
            origin: Arc::new(origin),
        }
    }

    /// Serve one call.
    ///
    /// Calls with a non-cacheable verb go straight to the origin. Otherwise a
    /// live entry is returned without calling the origin; a miss or an expired
    /// entry calls the origin and stores its result. Origin errors propagate
    /// and are never stored.
    #[instrument(skip_all, fields(verb = %verb, path = path))]
    pub async fn call<I, E, Fut>(
        &self,
        verb: Method,
        path: &str,
        input: Option<I>,
    ) -> Result<Dispatch<T, E>, E>
    where
        F: Fn(Option<I>, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        I: Serialize + Clone + Send + Sync + 'static,
        E: From<CacheError> + Send + 'static,
    {
        let context = CallContext {
            verb,
            path: path.to_string(),
        };

        if !self.core.is_cacheable(&context.verb) {
            debug!(cache = "intercept", outcome = "bypass", "verb is not cacheable");
            counter!(METRIC_BYPASS).increment(1);
            return (self.origin)(input, context).await.map(Dispatch::Bypassed);
        }

        let key = self.core.key_for(&context.verb, path, input.as_ref())?;

        let origin = Arc::clone(&self.origin);
        let fetch: Fetch<T, E> = Arc::new(move || origin(input.clone(), context.clone()).boxed());
        let binding = Arc::new(Binding::new(Arc::clone(&self.core), key, fetch));

        if let Some(entry) = self.core.lookup(binding.key())? {
            debug!(
                cache = "intercept",
                outcome = "hit",
                key = %binding.key(),
                "serving cached result"
            );
            counter!(METRIC_HIT).increment(1);
            return Ok(Dispatch::Cached(Cached::build(entry, binding)));
        }

        debug!(cache = "intercept", outcome = "miss", key = %binding.key(), "calling origin");
        counter!(METRIC_MISS).increment(1);
        let data = binding.fetch().await?;
        let entry = self.core.write(binding.key(), data, None)?;
        Ok(Dispatch::Cached(Cached::build(entry, binding)))
    }
}
