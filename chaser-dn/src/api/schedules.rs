//! Schedule listing endpoint

use crate::db::schedules::{self, Schedule};
use crate::error::ApiResult;
use crate::AppState;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleQuery {
    pub status: Option<String>,
    pub campaign_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ScheduleView {
    pub id: i64,
    pub campaign_id: i64,
    pub order_id: i64,
    pub recipient_email: String,
    pub scheduled_date: String,
    pub status: String,
    pub skip_reason: Option<String>,
    pub attempt_count: i64,
    pub sent_at: Option<String>,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub is_test: bool,
}

impl From<Schedule> for ScheduleView {
    fn from(s: Schedule) -> Self {
        Self {
            id: s.id,
            campaign_id: s.campaign_id,
            order_id: s.order_id,
            recipient_email: s.recipient_email,
            scheduled_date: s.scheduled_date.to_string(),
            status: s.status,
            skip_reason: s.skip_reason,
            attempt_count: s.attempt_count,
            sent_at: s.sent_at,
            message_id: s.message_id,
            error: s.error,
            is_test: s.is_test,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/schedules", get(list_schedules))
}

/// GET /schedules?status=&campaign_id=&limit=
async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<ScheduleQuery>,
) -> ApiResult<Json<Vec<ScheduleView>>> {
    let limit = query.limit.unwrap_or(100).clamp(1, 1000);
    let rows = schedules::list(
        &state.db,
        query.status.as_deref(),
        query.campaign_id,
        limit,
    )
    .await?;
    Ok(Json(rows.into_iter().map(ScheduleView::from).collect()))
}
