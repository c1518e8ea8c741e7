//! Outbound calls to dependencies.
//!
//! # Responsibilities
//! - Define the [`Downstream`] capability the pipeline calls through
//! - Forward buffered requests over HTTP with the hyper-util client
//! - Honor the per-attempt deadline and the cancellation token
//! - Classify failures (status, transport, deadline) into call outcomes
//!
//! # Design Decisions
//! - Request and response bodies are buffered so attempts can be replayed
//! - Non-2xx answers are failures: 5xx is transient, 4xx is not
//! - Hop-by-hop headers are stripped in both directions

use axum::{
    body::{Body, Bytes},
    http::{header, HeaderMap, HeaderName, Method, Request, StatusCode, Uri},
};
use futures_util::future::BoxFuture;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::resilience::{CallOutcome, ClassifyOutcome};

/// A request ready to be sent to a dependency. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub method: Method,
    /// Path and query relative to the dependency's base URL.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DownstreamRequest {
    pub fn get(path_and_query: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path_and_query.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

/// A successful (2xx) answer from a dependency.
#[derive(Debug, Clone)]
pub struct DownstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DownstreamResponse {
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("dependency answered {status}")]
    Status { status: StatusCode, body: Bytes },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("attempt deadline exceeded")]
    Timeout,

    #[error("call cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DownstreamError {
    /// Status code of the dependency's answer, if it answered.
    pub fn upstream_status(&self) -> Option<StatusCode> {
        match self {
            DownstreamError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl ClassifyOutcome for DownstreamError {
    fn outcome(&self) -> CallOutcome {
        match self {
            DownstreamError::Timeout | DownstreamError::Cancelled => CallOutcome::Timeout,
            _ => CallOutcome::Failure,
        }
    }

    fn is_transient(&self) -> bool {
        match self {
            DownstreamError::Status { status, .. } => status.is_server_error(),
            DownstreamError::Transport(_) | DownstreamError::Timeout => true,
            DownstreamError::Cancelled | DownstreamError::InvalidRequest(_) => false,
        }
    }
}

/// Outbound call capability.
///
/// Implementations must give up once `deadline` passes or `cancel` fires.
pub trait Downstream: Send + Sync + 'static {
    fn call(
        &self,
        endpoint: &Url,
        request: DownstreamRequest,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<DownstreamResponse, DownstreamError>>;
}

/// [`Downstream`] over plain HTTP/1.1 using the hyper-util pooled client.
#[derive(Clone)]
pub struct HttpDownstream {
    client: Client<HttpConnector, Body>,
    max_response_bytes: usize,
}

impl HttpDownstream {
    pub fn new(max_response_bytes: usize) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            max_response_bytes,
        }
    }
}

impl Downstream for HttpDownstream {
    fn call(
        &self,
        endpoint: &Url,
        request: DownstreamRequest,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> BoxFuture<'static, Result<DownstreamResponse, DownstreamError>> {
        let client = self.client.clone();
        let limit = self.max_response_bytes;
        let uri = target_uri(endpoint, &request.path_and_query);

        Box::pin(async move {
            let uri = uri?;
            let mut builder = Request::builder().method(request.method).uri(uri);
            if let Some(headers) = builder.headers_mut() {
                for (name, value) in request.headers.iter() {
                    if !is_hop_by_hop(name) {
                        headers.append(name.clone(), value.clone());
                    }
                }
            }
            let outbound = builder
                .body(Body::from(request.body))
                .map_err(|e| DownstreamError::InvalidRequest(e.to_string()))?;

            let exchange = async {
                let response: hyper::Response<hyper::body::Incoming> = client
                    .request(outbound)
                    .await
                    .map_err(|e| DownstreamError::Transport(e.to_string()))?;
                let (parts, body) = response.into_parts();
                let body = axum::body::to_bytes(Body::new(body), limit)
                    .await
                    .map_err(|e| DownstreamError::Transport(e.to_string()))?;
                Ok::<_, DownstreamError>((parts, body))
            };

            let (parts, body) = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownstreamError::Cancelled),
                result = tokio::time::timeout_at(deadline, exchange) => match result {
                    Ok(exchanged) => exchanged?,
                    Err(_) => return Err(DownstreamError::Timeout),
                },
            };

            if !parts.status.is_success() {
                return Err(DownstreamError::Status {
                    status: parts.status,
                    body,
                });
            }

            let mut headers = parts.headers;
            strip_hop_by_hop(&mut headers);
            Ok(DownstreamResponse {
                status: parts.status,
                headers,
                body,
            })
        })
    }
}

/// Join the dependency's base URL and a request path.
fn target_uri(endpoint: &Url, path_and_query: &str) -> Result<Uri, DownstreamError> {
    let base = endpoint.as_str().trim_end_matches('/');
    let target = match path_and_query {
        "" => format!("{base}/"),
        p if p.starts_with('/') => format!("{base}{p}"),
        p => format!("{base}/{p}"),
    };
    target
        .parse::<Uri>()
        .map_err(|e| DownstreamError::InvalidRequest(format!("{target}: {e}")))
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::HOST
        || name == header::CONTENT_LENGTH
        || name == header::TRANSFER_ENCODING
        || name == header::TE
        || name == header::TRAILER
        || name == header::UPGRADE
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name.as_str() == "keep-alive"
}

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let names: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}
