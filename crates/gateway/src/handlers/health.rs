//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use georesolve_common::ExecutionArgs;
use serde::Serialize;
use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: ReadyChecks,
}

#[derive(Serialize)]
pub struct ReadyChecks {
    pub engine_provider: String,
    pub candidates: Vec<String>,
}

/// Liveness probe - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: georesolve_common::VERSION.to_string(),
    })
}

/// Readiness probe - configuration loaded and at least one engine candidate
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let candidates: Vec<String> = state
        .runner
        .candidates(&ExecutionArgs::default())
        .iter()
        .map(|c| c.kind.as_str().to_string())
        .collect();

    let ready = !candidates.is_empty();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            checks: ReadyChecks {
                engine_provider: state.runner.config().engine.provider.clone(),
                candidates,
            },
        }),
    )
}
