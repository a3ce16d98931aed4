//! Response cache middleware.
//!
//! Runs each request with a cacheable method through a [`ResponseCache`].
//! The key is built from the method, the path and a JSON object holding the
//! query string and request body, so `GET /feed?page=2` is stored under
//! `GET:/feed:{"query":"page=2"}` and a bare `GET /feed` under `GET:/feed:`.
//! Requests that accept `text/event-stream` are never cached.

use std::sync::Mutex;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, instrument, warn};

use crate::cache::lock::mutex_lock;
use crate::cache::{CacheConfig, CacheError, CallContext, ResponseCache};
use crate::infra::cache::{
    Buffered, CachedResponse, buffer_response, is_event_stream, should_store_response,
};

const SOURCE: &str = "infra::http::layer";

/// Shared cache state for the middleware.
#[derive(Clone)]
pub struct CacheState {
    pub cache: ResponseCache<CachedResponse>,
    /// Largest request or response body buffered for caching.
    pub body_limit: usize,
}

impl CacheState {
    pub fn new(cache: ResponseCache<CachedResponse>, body_limit: usize) -> Self {
        Self { cache, body_limit }
    }

    /// State backed by a fresh in-memory cache built from `config`.
    pub fn from_config(config: CacheConfig) -> Self {
        let body_limit = config.response_body_limit_bytes;
        Self::new(ResponseCache::new(config), body_limit)
    }
}

#[derive(Debug, Clone, Serialize)]
struct RequestInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<String>,
}

impl RequestInput {
    fn from_parts(parts: &Parts, body: &Bytes) -> Option<Self> {
        let query = parts
            .uri
            .query()
            .filter(|query| !query.is_empty())
            .map(str::to_string);
        let body = (!body.is_empty()).then(|| String::from_utf8_lossy(body).into_owned());

        (query.is_some() || body.is_some()).then_some(Self { query, body })
    }
}

/// Why a forwarded request did not produce a cacheable response.
enum LayerError {
    /// Returned to the client as is and not stored.
    Passthrough(Response),
    Cache(CacheError),
}

impl From<CacheError> for LayerError {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}

/// Middleware serving cacheable requests from the response cache.
///
/// Only successful, cookie-free, non-streaming responses are stored; any other
/// response reaches the client unchanged.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(state): State<CacheState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.cache.is_cacheable(request.method()) {
        return next.run(request).await;
    }

    if is_event_stream(request.headers(), header::ACCEPT) {
        debug!(cache = "http", outcome = "skip", "streaming request");
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, state.body_limit).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(error = %err, "failed to buffer request body");
            return StatusCode::PAYLOAD_TOO_LARGE.into_response();
        }
    };

    let verb = parts.method.clone();
    let path = parts.uri.path().to_string();
    let input = RequestInput::from_parts(&parts, &bytes);

    // `Next` runs once; the origin hands it out to the first fetch only.
    let pending = Mutex::new(Some((Request::from_parts(parts, Body::from(bytes)), next)));
    let body_limit = state.body_limit;
    let origin = state
        .cache
        .intercept(move |_: Option<RequestInput>, _: CallContext| {
            let pending = mutex_lock(&pending, SOURCE, "take").take();
            forward(pending, body_limit)
        });

    match origin.call(verb, &path, input).await {
        Ok(dispatch) => dispatch.into_data().into_response(),
        Err(LayerError::Passthrough(response)) => response,
        Err(LayerError::Cache(err)) => {
            error!(error = %err, "response cache failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn forward(
    pending: Option<(Request, Next)>,
    body_limit: usize,
) -> Result<CachedResponse, LayerError> {
    let Some((request, next)) = pending else {
        return Err(LayerError::Passthrough(
            StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        ));
    };

    let response = next.run(request).await;
    if !should_store_response(&response) {
        debug!(
            cache = "http",
            outcome = "uncacheable",
            status = %response.status(),
            "passing response through"
        );
        return Err(LayerError::Passthrough(response));
    }

    match buffer_response(response, body_limit).await {
        Ok(Buffered::Complete(cached)) => Ok(cached),
        Ok(Buffered::Oversized(response)) => {
            debug!(
                cache = "http",
                outcome = "uncacheable",
                limit = body_limit,
                "response exceeds cacheable size"
            );
            Err(LayerError::Passthrough(response))
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer response body");
            Err(LayerError::Passthrough(
                StatusCode::BAD_GATEWAY.into_response(),
            ))
        }
    }
}
