//! Admin API: inspect and reset per-dependency guard state.
//!
//! Served on its own listener, every route behind bearer-token auth.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/dependencies", get(get_dependencies))
        .route("/admin/dependencies/{name}", get(get_dependency))
        .route("/admin/dependencies/{name}/reset", post(reset_dependency))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependencyConfig, GatewayConfig};
    use crate::http::HttpServer;
    use crate::resilience::{CallOutcome, CircuitState};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    fn state() -> AppState {
        let mut config = GatewayConfig::default();
        config.admin.api_key = "secret".into();
        let mut dependency = DependencyConfig::new("hello", "http://127.0.0.1:1");
        dependency.circuit_breaker.sliding_window_size = 1;
        dependency.circuit_breaker.minimum_number_of_calls = 1;
        config.dependencies.push(dependency);
        HttpServer::new(config).state().clone()
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer secret")
            .body(Body::empty())
            .unwrap()
    }

    async fn json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_requires_bearer_token() {
        let router = admin_router(state());
        let response = router
            .clone()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                Request::get("/admin/status")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_dependency_views_and_reset() {
        let state = state();
        let guards = state.registry().get("hello").unwrap();
        let permission = guards.breaker.allow().unwrap();
        guards.breaker.record_outcome(permission, CallOutcome::Failure);
        assert_eq!(guards.breaker.state(), CircuitState::Open);

        let router = admin_router(state);
        let status = json(router.clone().oneshot(authed("GET", "/admin/status")).await.unwrap()).await;
        assert_eq!(status["status"], "degraded");
        assert_eq!(status["open_circuits"], 1);

        let list = json(router.clone().oneshot(authed("GET", "/admin/dependencies")).await.unwrap()).await;
        assert_eq!(list[0]["name"], "hello");
        assert_eq!(list[0]["circuit"]["state"], "open");

        let missing = router
            .clone()
            .oneshot(authed("GET", "/admin/dependencies/nope"))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let reset = json(
            router
                .clone()
                .oneshot(authed("POST", "/admin/dependencies/hello/reset"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(reset["state"], "closed");

        let one = json(router.oneshot(authed("GET", "/admin/dependencies/hello")).await.unwrap()).await;
        assert_eq!(one["circuit"]["state"], "closed");
    }
}
