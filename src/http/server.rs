//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (tracing, limits, request ID, timeout)
//! - Bind server to listener
//! - Hand requests to the dispatch pipeline
//! - Apply configuration updates to the live registry
//! - Run the admin API next to the main listener when enabled

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Path, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::GatewayConfig;
use crate::dispatch::{
    DependencyRegistry, DispatchPipeline, Downstream, DownstreamRequest, HttpDownstream,
};
use crate::http::request::{into_downstream, request_id, MakeRequestUuid, X_REQUEST_ID};
use crate::http::response::from_downstream;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: DispatchPipeline,
    pub config: Arc<ArcSwap<GatewayConfig>>,
}

impl AppState {
    pub fn registry(&self) -> &Arc<DependencyRegistry> {
        self.pipeline.registry()
    }

    /// Swap in a new configuration and reconcile the registry with it.
    pub fn apply_config(&self, config: GatewayConfig) {
        let previous = self.config.load_full();
        if previous.listener != config.listener || previous.timeouts != config.timeouts || previous.admin != config.admin {
            tracing::warn!("Listener, timeout and admin settings take effect on restart");
        }
        self.registry().apply(&config.dependencies);
        self.config.store(Arc::new(config));
        tracing::info!(dependencies = self.registry().len(), "Configuration applied");
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server forwarding over HTTP.
    pub fn new(config: GatewayConfig) -> Self {
        let downstream = Arc::new(HttpDownstream::new(config.listener.max_body_bytes));
        Self::with_downstream(config, downstream)
    }

    /// Create a server that calls dependencies through `downstream`.
    pub fn with_downstream(config: GatewayConfig, downstream: Arc<dyn Downstream>) -> Self {
        let registry = Arc::new(DependencyRegistry::from_configs(&config.dependencies));
        let state = AppState {
            pipeline: DispatchPipeline::new(registry, downstream),
            config: Arc::new(ArcSwap::from_pointee(config)),
        };
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let config = self.state.config.load();
        Router::new()
            .route("/", get(default_dependency_handler))
            .route("/health", get(health_handler))
            .route("/dispatch/{dependency}", any(dispatch_handler))
            .route("/dispatch/{dependency}/{*path}", any(dispatch_path_handler))
            .with_state(self.state.clone())
            .layer(DefaultBodyLimit::max(config.listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = request_id(request.headers()),
                )
            }))
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Configuration updates received on `config_updates` are applied while
    /// running. The admin API is served on its own listener when enabled.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, dependencies = self.state.registry().len(), "HTTP server starting");

        let admin_task = {
            let config = self.state.config.load_full();
            if config.admin.enabled {
                let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
                tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
                let router = admin::admin_router(self.state.clone());
                let mut admin_shutdown = shutdown.resubscribe();
                Some(tokio::spawn(async move {
                    let served = axum::serve(admin_listener, router)
                        .with_graceful_shutdown(async move {
                            let _ = admin_shutdown.recv().await;
                        })
                        .await;
                    if let Err(e) = served {
                        tracing::error!(error = %e, "Admin API stopped with error");
                    }
                }))
            } else {
                None
            }
        };

        let update_task = {
            let state = self.state.clone();
            let mut update_shutdown = shutdown.resubscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        update = config_updates.recv() => match update {
                            Some(config) => state.apply_config(config),
                            None => break,
                        },
                        _ = update_shutdown.recv() => break,
                    }
                }
            })
        };

        let app = self.router();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        update_task.abort();
        if let Some(task) = admin_task {
            let _ = task.await;
        }
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn dispatch_handler(
    State(state): State<AppState>,
    Path(dependency): Path<String>,
    request: Request<Body>,
) -> Response {
    forward(&state, &dependency, "", request).await
}

async fn dispatch_path_handler(
    State(state): State<AppState>,
    Path((dependency, path)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    forward(&state, &dependency, &path, request).await
}

async fn forward(state: &AppState, dependency: &str, path: &str, request: Request<Body>) -> Response {
    let max_body_bytes = state.config.load().listener.max_body_bytes;
    let request = match into_downstream(request, path, max_body_bytes).await {
        Ok(request) => request,
        Err(e) => return (StatusCode::PAYLOAD_TOO_LARGE, e.to_string()).into_response(),
    };

    match state.pipeline.dispatch(dependency, request).await {
        Ok(response) => from_downstream(response),
        Err(e) => e.into_response(),
    }
}

/// Calls the default dependency and reports the result as plain text.
async fn default_dependency_handler(State(state): State<AppState>) -> Response {
    let Some(dependency) = state.config.load().default_dependency.clone() else {
        return (StatusCode::NOT_FOUND, "No default dependency configured\n").into_response();
    };

    match state.pipeline.dispatch(&dependency, DownstreamRequest::get("/")).await {
        Ok(response) => format!("Got: {}\n", String::from_utf8_lossy(&response.body)).into_response(),
        Err(e) => format!("Failed with: {e}\n").into_response(),
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
