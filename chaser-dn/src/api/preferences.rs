//! Opt-out administration and the public opt-out link target

use crate::db::preferences::{self, CustomerPreference};
use crate::error::{ApiError, ApiResult};
use crate::services::template;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
pub struct SetOptOutRequest {
    pub email: String,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub reminders: bool,
    #[serde(default)]
    pub collections: bool,
}

#[derive(Debug, Deserialize)]
pub struct OptOutLinkQuery {
    pub email: String,
    pub token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/optouts", get(list_optouts).post(set_optout))
        .route("/optouts/:email", axum::routing::delete(opt_in))
        .route("/optout", get(optout_link))
}

/// GET /optouts
async fn list_optouts(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<CustomerPreference>>> {
    Ok(Json(preferences::list(&state.db).await?))
}

/// POST /optouts
async fn set_optout(
    State(state): State<AppState>,
    Json(request): Json<SetOptOutRequest>,
) -> ApiResult<Json<CustomerPreference>> {
    let email = request.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(ApiError::BadRequest(format!(
            "not an email address: {:?}",
            request.email
        )));
    }
    if !(request.all || request.reminders || request.collections) {
        return Err(ApiError::BadRequest(
            "at least one opt-out flag must be set".to_string(),
        ));
    }

    preferences::set_opt_out(
        &state.db,
        &email,
        request.all,
        request.reminders,
        request.collections,
    )
    .await?;
    tracing::info!(email = %email, "Opt-out recorded");

    let preference = preferences::get(&state.db, &email)
        .await?
        .ok_or_else(|| ApiError::Internal("preference row missing after write".to_string()))?;
    Ok(Json(preference))
}

/// DELETE /optouts/:email
async fn opt_in(
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !preferences::opt_in(&state.db, &email).await? {
        return Err(ApiError::NotFound(format!("no opt-out for {email}")));
    }
    tracing::info!(email = %email, "Opt-in recorded");
    Ok(Json(json!({ "opted_in": email.to_lowercase() })))
}

/// GET /optout?email=&token=
///
/// The recipient-facing link embedded in every outgoing message. The
/// token scopes the link to one address; a valid request records a full
/// opt-out.
async fn optout_link(
    State(state): State<AppState>,
    Query(query): Query<OptOutLinkQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let secret = state
        .service_config
        .service
        .optout_secret
        .as_deref()
        .unwrap_or_default();

    if !template::verify_optout_token(&query.email, secret, &query.token) {
        return Err(ApiError::BadRequest("invalid opt-out token".to_string()));
    }

    preferences::set_opt_out(&state.db, &query.email, true, false, false).await?;
    tracing::info!(email = %query.email.to_lowercase(), "Recipient opted out via link");

    Ok(Json(json!({
        "opted_out": query.email.to_lowercase(),
        "message": "You will no longer receive payment notifications.",
    })))
}
