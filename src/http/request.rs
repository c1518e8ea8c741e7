//! Request handling and transformation.
//!
//! # Responsibilities
//! - Generate unique request ID (UUID v4)
//! - Buffer the inbound body within the configured limit
//! - Prepare request for forwarding to a dependency
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The request ID header is kept on the forwarded request so dependencies
//!   can correlate

use axum::{
    body::Body,
    http::{header::HeaderName, HeaderMap, HeaderValue, Request},
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::dispatch::DownstreamRequest;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Generates a UUID v4 request ID for requests that arrive without one.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Request ID of a request, or `"unknown"`.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(&X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// The body exceeded the inbound limit.
#[derive(Debug, thiserror::Error)]
#[error("request body too large (limit {limit} bytes)")]
pub struct BodyTooLarge {
    pub limit: usize,
}

/// Buffer an inbound request into a forwardable one targeting `path`.
///
/// `path` is relative to the dependency's base URL; the inbound query string
/// is carried over.
pub async fn into_downstream(
    request: Request<Body>,
    path: &str,
    max_body_bytes: usize,
) -> Result<DownstreamRequest, BodyTooLarge> {
    let (parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|_| BodyTooLarge {
            limit: max_body_bytes,
        })?;

    let mut path_and_query = format!("/{}", path.trim_start_matches('/'));
    if let Some(query) = parts.uri.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }

    Ok(DownstreamRequest {
        method: parts.method,
        path_and_query,
        headers: parts.headers,
        body,
    })
}
