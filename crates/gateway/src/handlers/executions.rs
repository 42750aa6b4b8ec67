//! Execution handlers

use axum::{extract::State, Json};
use serde::Serialize;
use tracing::info;

use crate::AppState;
use georesolve_common::{
    errors::{AppError, Result},
    execution::{validate, ExecutionArgs, ExecutionReport, ValidationIssue},
};

/// Validation response
#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
}

/// Check arguments without touching the engine
pub async fn validate_execution(Json(args): Json<ExecutionArgs>) -> Json<ValidateResponse> {
    let issues = validate(&args);
    Json(ValidateResponse {
        valid: issues.is_empty(),
        issues,
    })
}

/// Run one execution to completion; the session is closed before responding.
pub async fn create_execution(
    State(state): State<AppState>,
    Json(args): Json<ExecutionArgs>,
) -> Result<Json<ExecutionReport>> {
    // Detached so the session is still closed if the client goes away
    let runner = state.runner.clone();
    let report = tokio::spawn(async move { runner.execute(&args).await })
        .await
        .map_err(|e| AppError::Internal {
            message: format!("execution task failed: {}", e),
        })??;

    info!(
        output = %report.output_path.display(),
        bytes = report.bytes_written,
        duration_ms = report.duration_ms,
        "Execution completed"
    );

    Ok(Json(report))
}
