use axum::{
    body::{Body, HttpBody},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use thiserror::Error;

/// A fully buffered HTTP response that can be replayed any number of times.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let mut stored_headers = Vec::with_capacity(headers.len());
        for (name, value) in headers.iter() {
            stored_headers.push((name.clone(), value.clone()));
        }

        Self {
            status,
            headers: stored_headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        headers.clear();
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        response
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to buffer response body: {0}")]
    Body(String),
}

/// Successful, cookie-free, non-streaming responses are safe to replay.
pub fn should_store_response(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    !is_event_stream(response.headers(), header::CONTENT_TYPE)
}

/// True when the header names an SSE stream.
pub fn is_event_stream(headers: &HeaderMap, name: HeaderName) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("text/event-stream"))
}

/// Result of reading a response body under a size limit.
#[derive(Debug)]
pub enum Buffered {
    Complete(CachedResponse),
    /// Longer than the limit. The response is handed back with its body intact.
    Oversized(Response),
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

/// Read the whole body if it fits in `limit` bytes.
///
/// A body that turns out to be longer is rebuilt from the chunks read so far
/// followed by the rest of the stream.
pub async fn buffer_response(response: Response, limit: usize) -> Result<Buffered, BufferError> {
    let (parts, body) = response.into_parts();
    let limit_u64 = u64::try_from(limit).unwrap_or(u64::MAX);

    let declared = body
        .size_hint()
        .exact()
        .or_else(|| declared_length(&parts.headers));
    if declared.is_some_and(|len| len > limit_u64) {
        return Ok(Buffered::Oversized(Response::from_parts(parts, body)));
    }

    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut total = 0_usize;
    while let Some(chunk) = data.next().await {
        let chunk = chunk.map_err(|err| BufferError::Body(err.to_string()))?;
        total = total.saturating_add(chunk.len());
        chunks.push(chunk);

        if total > limit {
            let head = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
            let body = Body::from_stream(head.chain(data));
            return Ok(Buffered::Oversized(Response::from_parts(parts, body)));
        }
    }

    let mut bytes = BytesMut::with_capacity(total);
    for chunk in chunks {
        bytes.extend_from_slice(&chunk);
    }
    Ok(Buffered::Complete(CachedResponse::new(
        parts.status,
        &parts.headers,
        bytes.freeze(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response_with(status: StatusCode, headers: &[(HeaderName, &'static str)]) -> Response {
        let mut response = Response::new(Body::from("payload"));
        *response.status_mut() = status;
        for (name, value) in headers {
            response
                .headers_mut()
                .insert(name.clone(), HeaderValue::from_static(value));
        }
        response
    }

    #[test]
    fn only_plain_successes_are_stored() {
        assert!(should_store_response(&response_with(StatusCode::OK, &[])));
        assert!(should_store_response(&response_with(StatusCode::CREATED, &[])));
        assert!(!should_store_response(&response_with(
            StatusCode::NOT_FOUND,
            &[]
        )));
        assert!(!should_store_response(&response_with(
            StatusCode::OK,
            &[(header::SET_COOKIE, "session=1")]
        )));
        assert!(!should_store_response(&response_with(
            StatusCode::OK,
            &[(header::CONTENT_TYPE, "text/event-stream")]
        )));
    }

    #[tokio::test]
    async fn buffered_response_replays_status_headers_and_body() {
        let response = response_with(StatusCode::OK, &[(header::CONTENT_TYPE, "text/plain")]);
        let Buffered::Complete(cached) = buffer_response(response, 1024).await.expect("buffered")
        else {
            panic!("payload fits the limit");
        };

        let replayed = cached.clone().into_response();
        assert_eq!(replayed.status(), StatusCode::OK);
        assert_eq!(
            replayed.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
        let body = axum::body::to_bytes(replayed.into_body(), 1024)
            .await
            .expect("body");
        assert_eq!(body, Bytes::from_static(b"payload"));
        assert_eq!(cached.body(), &Bytes::from_static(b"payload"));
    }

    async fn body_text(response: Response) -> Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body")
    }

    #[tokio::test]
    async fn oversized_body_is_handed_back_intact() {
        let response = response_with(StatusCode::OK, &[(header::CONTENT_TYPE, "text/plain")]);
        let Buffered::Oversized(response) = buffer_response(response, 3).await.expect("buffer")
        else {
            panic!("payload exceeds the limit");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE),
            Some(&HeaderValue::from_static("text/plain"))
        );
        assert_eq!(body_text(response).await, Bytes::from_static(b"payload"));
    }

    #[tokio::test]
    async fn streamed_body_over_the_limit_keeps_every_chunk() {
        let chunks = ["abc", "def", "ghi"].map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk)));
        let response = Response::new(Body::from_stream(stream::iter(chunks)));

        let Buffered::Oversized(response) = buffer_response(response, 4).await.expect("buffer")
        else {
            panic!("stream exceeds the limit");
        };
        assert_eq!(body_text(response).await, Bytes::from_static(b"abcdefghi"));
    }

    #[tokio::test]
    async fn streamed_body_within_the_limit_is_joined() {
        let chunks = ["ab", "cd"].map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk)));
        let response = Response::new(Body::from_stream(stream::iter(chunks)));

        let Buffered::Complete(cached) = buffer_response(response, 4).await.expect("buffer") else {
            panic!("stream fits the limit");
        };
        assert_eq!(cached.body(), &Bytes::from_static(b"abcd"));
    }
}
