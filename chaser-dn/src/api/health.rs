//! Health check endpoint

use crate::error::ApiResult;
use crate::{db, AppState};
use axum::routing::get;
use axum::{extract::State, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: i64,
    pub cached_invoices: i64,
    pub last_run: Option<db::runs::DunningRun>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// GET /health
async fn health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let cached_invoices = db::invoices::count(&state.db).await?;
    let last_run = db::runs::list_recent(&state.db, 1).await?.into_iter().next();

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (chrono::Utc::now() - state.startup_time).num_seconds(),
        cached_invoices,
        last_run,
    }))
}
