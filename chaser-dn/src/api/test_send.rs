//! Ad hoc test message endpoint
//!
//! Sends a single message through the real template renderer and mail
//! collaborator without touching the schedule ledger. Used to verify
//! sender identity and template output before enabling a campaign.

use crate::config::RunConfiguration;
use crate::db::campaigns;
use crate::error::{ApiError, ApiResult};
use crate::services::template;
use crate::AppState;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct TestSendRequest {
    pub to: String,
    /// Campaign whose templates to render; falls back to a fixed probe
    /// message when absent
    pub campaign_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TestSendResponse {
    pub message_id: String,
    pub to: String,
    pub subject: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/test-send", post(test_send))
}

/// POST /test-send
async fn test_send(
    State(state): State<AppState>,
    Json(request): Json<TestSendRequest>,
) -> ApiResult<Json<TestSendResponse>> {
    let to = request.to.trim().to_lowercase();
    if !to.contains('@') {
        return Err(ApiError::BadRequest(format!(
            "not an email address: {:?}",
            request.to
        )));
    }

    let config = RunConfiguration::load(&state.db, &state.service_config, true).await?;
    let sender_email = config
        .sender_email
        .clone()
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("no sender identity configured".to_string()))?;

    let (subject_template, body_template) = match request.campaign_id {
        Some(id) => {
            let campaign = campaigns::get(&state.db, id)
                .await?
                .ok_or_else(|| ApiError::NotFound(format!("campaign {id}")))?;
            (campaign.subject_template, campaign.body_template)
        }
        None => (
            "Chaser test message".to_string(),
            "This is a test message from Chaser.\n\n{{OPTOUT_LINK}}".to_string(),
        ),
    };

    // Placeholder sample values so template edits can be previewed
    let vars: HashMap<&'static str, String> = HashMap::from([
        ("CUSTOMER_NAME", "Test Customer".to_string()),
        ("COMPANY_NAME", "Test Company".to_string()),
        ("INVOICE_NUMBER", "INV-TEST".to_string()),
        ("ORDER_REF", "SO-TEST".to_string()),
        ("ORDER_ID", "0".to_string()),
        ("AMOUNT_TOTAL", template::format_currency(200.0)),
        ("AMOUNT_PAID", template::format_currency(50.0)),
        ("AMOUNT_DUE", template::format_currency(150.0)),
        ("DAYS_OUTSTANDING", "45".to_string()),
        ("ORDER_DATE", "2026-01-01".to_string()),
        ("INVOICE_DATE", "2026-01-01".to_string()),
        ("PAYMENT_LINK", "https://example.com/pay/test".to_string()),
        (
            "OPTOUT_LINK",
            template::build_optout_url(config.public_base_url.as_deref(), &to, &config.optout_secret)
                .unwrap_or_default(),
        ),
        ("SENDER_NAME", config.sender_name.clone().unwrap_or_default()),
    ]);

    let subject = format!("[TEST] {}", template::render(&subject_template, &vars));
    let body = template::render(&body_template, &vars);

    let mailer = state
        .orchestrator
        .mailer()
        .ok_or_else(|| ApiError::BadRequest("mail collaborator not configured".to_string()))?;

    let email = crate::services::OutboundEmail {
        from_name: config.sender_name.clone(),
        from_email: sender_email,
        to: to.clone(),
        subject: subject.clone(),
        body,
        attachment: None,
    };

    let message_id = mailer
        .send(&email)
        .await
        .map_err(|e| ApiError::Internal(format!("test send failed: {e}")))?;

    tracing::info!(to = %to, message_id = %message_id, "Test message sent");

    Ok(Json(TestSendResponse {
        message_id,
        to,
        subject,
    }))
}
