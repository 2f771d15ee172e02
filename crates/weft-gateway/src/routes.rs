use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use weft_core::error::WeftError;
use weft_core::types::{GraphSpec, RunSnapshot};

use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

// GET /api/health (no auth)
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
pub struct SubmitBody {
    pub graph: GraphSpec,
}

// POST /api/orchestrator/submit
pub async fn submit(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SubmitBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    match state.supervisor.submit(body.graph).await {
        Ok(run_id) => Ok((StatusCode::ACCEPTED, Json(json!({ "runId": run_id })))),
        Err(e @ WeftError::DuplicateRun(_)) => Err(api_error(StatusCode::CONFLICT, e.to_string())),
        Err(e) => {
            warn!(error = %e, "Submit failed");
            Err(api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}

// GET /api/orchestrator/status/{run_id}
pub async fn status(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunSnapshot>, ApiError> {
    state
        .supervisor
        .status(&run_id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown run '{}'", run_id)))
}

// POST /api/orchestrator/cancel/{run_id}
pub async fn cancel(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.supervisor.cancel(&run_id) {
        return Err(api_error(StatusCode::NOT_FOUND, format!("unknown run '{}'", run_id)));
    }
    info!(run_id = %run_id, "Cancel requested over HTTP");
    Ok(Json(json!({ "runId": run_id, "cancelled": true })))
}

// GET /api/orchestrator/runs
pub async fn list_runs(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(json!({ "runs": state.supervisor.list() }))
}

// GET /api/tools
pub async fn list_tools(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<serde_json::Value> {
    Json(json!({ "tools": state.tools.list() }))
}
