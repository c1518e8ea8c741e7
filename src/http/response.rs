//! Response handling and transformation.
//!
//! # Responsibilities
//! - Turn a dependency's answer into the client response
//! - Map dispatch failures to HTTP status codes and a JSON body
//!
//! # Design Decisions
//! - Hop-by-hop headers are already stripped by the downstream client
//! - Timeouts result in 504 Gateway Timeout
//! - Guard rejections are 503 (429 for rate limiting) so clients can back off

use axum::{
    body::Body,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::dispatch::{DispatchError, DownstreamResponse};

/// JSON body for failed dispatches.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    pub dependency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

pub fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::Rejected { .. }
        | DispatchError::BulkheadFull { .. }
        | DispatchError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DispatchError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        DispatchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        DispatchError::Downstream { .. } => StatusCode::BAD_GATEWAY,
        DispatchError::UnknownDependency { .. } => StatusCode::NOT_FOUND,
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let upstream_status = match &self {
            DispatchError::Downstream { source, .. } => source.upstream_status().map(|s| s.as_u16()),
            _ => None,
        };
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
            dependency: self.dependency().to_string(),
            upstream_status,
        };
        (status_for(&self), Json(body)).into_response()
    }
}

pub fn from_downstream(response: DownstreamResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
