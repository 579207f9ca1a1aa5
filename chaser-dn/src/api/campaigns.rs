//! Campaign administration endpoints

use crate::db::campaigns::{self, Campaign};
use crate::error::{ApiError, ApiResult};
use crate::services::safety;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{post, put};
use axum::{Json, Router};
use chaser_common::events::ChaserEvent;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct UpdateTemplatesRequest {
    pub subject_template: String,
    pub body_template: String,
}

#[derive(Debug, Serialize)]
pub struct EmergencyStopResponse {
    pub campaigns_deactivated: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/campaigns", axum::routing::get(list_campaigns))
        .route("/campaigns/:id/activate", post(activate))
        .route("/campaigns/:id/deactivate", post(deactivate))
        .route("/campaigns/:id/templates", put(update_templates))
        .route("/emergency-stop", post(emergency_stop))
}

/// GET /campaigns
async fn list_campaigns(State(state): State<AppState>) -> ApiResult<Json<Vec<CampaignView>>> {
    let campaigns = campaigns::list_all(&state.db).await?;
    Ok(Json(campaigns.into_iter().map(CampaignView::from).collect()))
}

/// Campaign as exposed over the API
#[derive(Debug, Serialize)]
pub struct CampaignView {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub trigger_days: i64,
    pub recurring_interval_days: Option<i64>,
    pub active: bool,
    pub subject_template: String,
    pub body_template: String,
}

impl From<Campaign> for CampaignView {
    fn from(c: Campaign) -> Self {
        Self {
            id: c.id,
            name: c.name,
            kind: c.kind,
            trigger_days: c.trigger_days,
            recurring_interval_days: c.recurring_interval_days,
            active: c.active,
            subject_template: c.subject_template,
            body_template: c.body_template,
        }
    }
}

/// POST /campaigns/:id/activate
async fn activate(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<CampaignView>> {
    set_active(state, id, true).await
}

/// POST /campaigns/:id/deactivate
async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Json<CampaignView>> {
    set_active(state, id, false).await
}

async fn set_active(state: AppState, id: i64, active: bool) -> ApiResult<Json<CampaignView>> {
    if !campaigns::set_active(&state.db, id, active).await? {
        return Err(ApiError::NotFound(format!("campaign {id}")));
    }
    tracing::info!(campaign_id = id, active, "Campaign toggled");

    let campaign = campaigns::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("campaign {id}")))?;
    Ok(Json(campaign.into()))
}

/// PUT /campaigns/:id/templates
async fn update_templates(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateTemplatesRequest>,
) -> ApiResult<Json<CampaignView>> {
    if request.subject_template.trim().is_empty() {
        return Err(ApiError::BadRequest("subject_template is empty".to_string()));
    }

    if !campaigns::update_templates(
        &state.db,
        id,
        &request.subject_template,
        &request.body_template,
    )
    .await?
    {
        return Err(ApiError::NotFound(format!("campaign {id}")));
    }

    let campaign = campaigns::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("campaign {id}")))?;
    Ok(Json(campaign.into()))
}

/// POST /emergency-stop
async fn emergency_stop(State(state): State<AppState>) -> ApiResult<Json<EmergencyStopResponse>> {
    let campaigns_deactivated = safety::emergency_stop(&state.db).await?;

    state.event_bus.emit_lossy(ChaserEvent::EmergencyStop {
        campaigns_deactivated,
        timestamp: chrono::Utc::now(),
    });

    Ok(Json(EmergencyStopResponse {
        campaigns_deactivated,
    }))
}
