//! Control routes over one cache instance.
//!
//! - `POST /clear` drops every entry
//! - `POST /invalidate` takes `{"verb", "path", "input"}` and drops the entry
//!   that call would be served from
//! - `POST /invalidate-key` takes `{"key"}`
//! - `GET /keys` lists stored keys, least recently used first

use axum::{
    Json, Router,
    extract::State,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

use crate::cache::{CacheError, ResponseCache};

#[derive(Debug, Deserialize)]
struct InvalidateRequest {
    verb: String,
    path: String,
    #[serde(default)]
    input: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct InvalidateKeyRequest {
    key: String,
}

#[derive(Debug, Serialize)]
struct KeysResponse {
    keys: Vec<String>,
}

/// Router exposing the control surface of `cache`. Nest it wherever the host
/// keeps its administrative routes.
pub fn control_router<T>(cache: ResponseCache<T>) -> Router
where
    T: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/clear", post(clear::<T>))
        .route("/invalidate", post(invalidate::<T>))
        .route("/invalidate-key", post(invalidate_key::<T>))
        .route("/keys", get(keys::<T>))
        .with_state(cache)
}

async fn clear<T>(State(cache): State<ResponseCache<T>>) -> Response
where
    T: Clone + Send + Sync + 'static,
{
    match cache.clear() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => cache_error_response("clear", err),
    }
}

async fn invalidate<T>(
    State(cache): State<ResponseCache<T>>,
    Json(request): Json<InvalidateRequest>,
) -> Response
where
    T: Clone + Send + Sync + 'static,
{
    let Ok(verb) = Method::from_bytes(request.verb.to_ascii_uppercase().as_bytes()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("invalid verb `{}`", request.verb) })),
        )
            .into_response();
    };

    match cache.invalidate(&verb, &request.path, request.input.as_ref()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => cache_error_response("invalidate", err),
    }
}

async fn invalidate_key<T>(
    State(cache): State<ResponseCache<T>>,
    Json(request): Json<InvalidateKeyRequest>,
) -> Response
where
    T: Clone + Send + Sync + 'static,
{
    match cache.invalidate_key(&request.key) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => cache_error_response("invalidate_key", err),
    }
}

async fn keys<T>(State(cache): State<ResponseCache<T>>) -> Response
where
    T: Clone + Send + Sync + 'static,
{
    match cache.keys() {
        Ok(keys) => Json(KeysResponse { keys }).into_response(),
        Err(err) => cache_error_response("keys", err),
    }
}

fn cache_error_response(op: &'static str, err: CacheError) -> Response {
    error!(op, error = %err, "cache control operation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
