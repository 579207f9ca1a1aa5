//! Run trigger and history endpoints
//!
//! POST /runs starts a run in a background task (202-style: the response
//! carries the run id, progress arrives over SSE); a second trigger while
//! one is active answers 409 Conflict.

use crate::error::{ApiError, ApiResult};
use crate::{db, AppState};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

/// POST /runs request
#[derive(Debug, Default, Deserialize)]
pub struct StartRunRequest {
    #[serde(default)]
    pub test_mode: bool,
}

/// POST /runs response
#[derive(Debug, Serialize)]
pub struct StartRunResponse {
    pub run_id: i64,
    pub status: &'static str,
    pub test_mode: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/:id", get(get_run))
}

/// POST /runs
async fn start_run(
    State(state): State<AppState>,
    request: Option<Json<StartRunRequest>>,
) -> ApiResult<Json<StartRunResponse>> {
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let run_id = state
        .orchestrator
        .begin_run("manual", request.test_mode)
        .await
        .map_err(|e| match e {
            chaser_common::Error::InvalidInput(msg) => ApiError::Conflict(msg),
            other => ApiError::Common(other),
        })?;

    // Execute in the background; every outcome lands in the run row
    let orchestrator = state.orchestrator.clone();
    let test_mode = request.test_mode;
    tokio::spawn(async move {
        if let Err(e) = orchestrator.execute_run(run_id, test_mode).await {
            tracing::error!(run_id, error = %e, "Background run task failed");
        }
    });

    Ok(Json(StartRunResponse {
        run_id,
        status: "running",
        test_mode: request.test_mode,
    }))
}

/// GET /runs
async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Vec<db::runs::DunningRun>>> {
    Ok(Json(db::runs::list_recent(&state.db, 50).await?))
}

/// GET /runs/:id
async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<db::runs::DunningRun>> {
    db::runs::get(&state.db, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {id}")))
}
