use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::dispatch::DependencyStatus;
use crate::http::server::AppState;
use crate::resilience::CircuitState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub dependencies: usize,
    pub open_circuits: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetResult {
    pub dependency: String,
    pub state: CircuitState,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let statuses = state.registry().statuses();
    let open_circuits = statuses
        .iter()
        .filter(|s| s.circuit.state != CircuitState::Closed)
        .count();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: if open_circuits == 0 { "operational" } else { "degraded" }.to_string(),
        dependencies: statuses.len(),
        open_circuits,
    })
}

pub async fn get_dependencies(State(state): State<AppState>) -> Json<Vec<DependencyStatus>> {
    Json(state.registry().statuses())
}

pub async fn get_dependency(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<DependencyStatus>, StatusCode> {
    state
        .registry()
        .status(&name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn reset_dependency(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ResetResult>, StatusCode> {
    if !state.registry().reset(&name) {
        return Err(StatusCode::NOT_FOUND);
    }
    let guards = state.registry().get(&name).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(ResetResult {
        dependency: name,
        state: guards.breaker.state(),
    }))
}
