//! Per-run configuration snapshot
//!
//! All operator-tunable values the orchestrator needs are read once from
//! the settings table and the static service config at the start of an
//! invocation. The resulting value is immutable for the life of the run,
//! so mid-run settings edits cannot produce half-old, half-new behavior.

use crate::db::settings::get_setting;
use chaser_common::config::ChaserConfig;
use chaser_common::Result;
use sqlx::SqlitePool;

/// Immutable configuration for one run
#[derive(Debug, Clone)]
pub struct RunConfiguration {
    /// Test-mode invocation: capped schedules, separate rows, purged at end
    pub test_mode: bool,

    /// Sender identity; a run cannot start without an email address
    pub sender_name: Option<String>,
    pub sender_email: Option<String>,

    /// Global send caps (production hard blocks, test-mode warnings)
    pub daily_send_cap: i64,
    pub hourly_send_cap: i64,

    /// Per-recipient cooldown across campaigns
    pub cooldown_hours: i64,

    /// Maximum schedules created per campaign in a test run
    pub test_schedule_cap: u64,

    /// Invoice upsert batch size during sync
    pub sync_batch_size: usize,

    /// Enrichment batching and pacing
    pub enrich_batch_size: usize,
    pub enrich_request_delay_ms: u64,
    pub enrich_batch_pause_ms: u64,

    /// Cached notes older than this are refreshed
    pub notes_staleness_hours: i64,

    /// How far back the ERP invoice listing reaches
    pub lookback_days: i64,

    /// Minimum days outstanding before any campaign applies
    pub min_days_outstanding: i64,

    /// Link construction
    pub payment_link_template: Option<String>,
    pub public_base_url: Option<String>,
    pub optout_secret: String,
}

impl RunConfiguration {
    /// Snapshot the configuration for a new run.
    pub async fn load(
        pool: &SqlitePool,
        service_config: &ChaserConfig,
        test_mode: bool,
    ) -> Result<Self> {
        let sender_name = get_setting::<String>(pool, "sender_name").await?;
        let sender_email = get_setting::<String>(pool, "sender_email").await?;
        let daily_send_cap = get_setting::<i64>(pool, "daily_send_cap")
            .await?
            .unwrap_or(200);
        let hourly_send_cap = get_setting::<i64>(pool, "hourly_send_cap")
            .await?
            .unwrap_or(50);
        let cooldown_hours = get_setting::<i64>(pool, "cooldown_hours")
            .await?
            .unwrap_or(24);
        let notes_staleness_hours = get_setting::<i64>(pool, "notes_staleness_hours")
            .await?
            .unwrap_or(24);
        let lookback_days = get_setting::<i64>(pool, "lookback_days")
            .await?
            .unwrap_or(730);
        let enrich_request_delay_ms = get_setting::<u64>(pool, "enrich_request_delay_ms")
            .await?
            .unwrap_or(250);
        let enrich_batch_pause_ms = get_setting::<u64>(pool, "enrich_batch_pause_ms")
            .await?
            .unwrap_or(1000);

        let optout_secret = service_config
            .service
            .optout_secret
            .clone()
            .unwrap_or_default();
        if optout_secret.is_empty() {
            tracing::warn!("No optout_secret configured; opt-out links will be omitted");
        }

        Ok(Self {
            test_mode,
            sender_name,
            sender_email,
            daily_send_cap,
            hourly_send_cap,
            cooldown_hours,
            test_schedule_cap: 3,
            sync_batch_size: 50,
            enrich_batch_size: 5,
            enrich_request_delay_ms,
            enrich_batch_pause_ms,
            notes_staleness_hours,
            lookback_days,
            min_days_outstanding: 30,
            payment_link_template: service_config.service.payment_link_template.clone(),
            public_base_url: service_config.service.public_base_url.clone(),
            optout_secret,
        })
    }

    /// Fully-populated configuration for tests
    #[cfg(test)]
    pub fn for_tests(test_mode: bool) -> Self {
        Self {
            test_mode,
            sender_name: Some("Billing".to_string()),
            sender_email: Some("billing@example.com".to_string()),
            daily_send_cap: 200,
            hourly_send_cap: 50,
            cooldown_hours: 24,
            test_schedule_cap: 3,
            sync_batch_size: 50,
            enrich_batch_size: 5,
            enrich_request_delay_ms: 0,
            enrich_batch_pause_ms: 0,
            notes_staleness_hours: 24,
            lookback_days: 730,
            min_days_outstanding: 30,
            payment_link_template: Some(
                "https://pay.example.com/{invoice_ref}?contact={contact_id}&order={order_id}"
                    .to_string(),
            ),
            public_base_url: Some("https://billing.example.com".to_string()),
            optout_secret: "test-secret".to_string(),
        }
    }
}
