//! Safety governor
//!
//! Pre-flight validation before a run may do anything, and per-recipient
//! re-checks at actual send time. Safety violations are first-class skip
//! outcomes, not errors; only missing configuration and an unreachable
//! store block a run outright.

use crate::config::RunConfiguration;
use crate::db::preferences::{self, OptOutScope};
use crate::db::schedules::{self, SkipReason};
use crate::db::{campaigns, runs};
use chaser_common::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

/// Runs inspected for the recent-failure warning
const FAILURE_WINDOW: i64 = 5;

/// Failures within the window that trigger the warning
const FAILURE_THRESHOLD: i64 = 3;

/// Non-blocking findings from pre-flight validation
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub warnings: Vec<String>,
}

/// Validate that a run may start at all.
///
/// Hard failures: no sender identity, unreachable cache store, and (in
/// production) exhausted global send caps. Zero active campaigns and a
/// recent failure streak only warn.
pub async fn preflight(pool: &SqlitePool, config: &RunConfiguration) -> Result<PreflightReport> {
    let mut report = PreflightReport::default();

    // (a) a usable sender identity must exist
    if config
        .sender_email
        .as_deref()
        .map(str::trim)
        .unwrap_or("")
        .is_empty()
    {
        return Err(Error::Config(
            "no sender identity configured (sender_email setting)".to_string(),
        ));
    }

    // (b) the cache store must answer
    sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await?;

    // (c) global send caps
    let now = Utc::now();
    let sent_today = schedules::sent_count_since(pool, &day_start_rfc3339(&now)).await?;
    let sent_last_hour =
        schedules::sent_count_since(pool, &(now - Duration::hours(1)).to_rfc3339()).await?;

    if sent_today >= config.daily_send_cap {
        let message = format!(
            "daily send cap reached ({sent_today}/{})",
            config.daily_send_cap
        );
        if config.test_mode {
            tracing::warn!("{message} (test mode, continuing)");
            report.warnings.push(message);
        } else {
            return Err(Error::Config(message));
        }
    }
    if sent_last_hour >= config.hourly_send_cap {
        let message = format!(
            "hourly send cap reached ({sent_last_hour}/{})",
            config.hourly_send_cap
        );
        if config.test_mode {
            tracing::warn!("{message} (test mode, continuing)");
            report.warnings.push(message);
        } else {
            return Err(Error::Config(message));
        }
    }

    // (d) non-blocking sanity warnings
    if campaigns::list_active_ordered(pool).await?.is_empty() {
        let message = "no active campaigns".to_string();
        tracing::warn!("{message}");
        report.warnings.push(message);
    }

    let recent_failures = runs::recent_failure_count(pool, FAILURE_WINDOW).await?;
    if recent_failures >= FAILURE_THRESHOLD {
        let message = format!("{recent_failures} of the last {FAILURE_WINDOW} runs failed");
        tracing::warn!("{message}");
        report.warnings.push(message);
    }

    Ok(report)
}

/// Per-recipient re-validation at send time. State may have changed since
/// scheduling, so opt-out, outstanding balance and the cooldown are all
/// checked again. Returns the skip reason, or `None` when the send may
/// proceed.
pub async fn send_time_check(
    pool: &SqlitePool,
    config: &RunConfiguration,
    recipient_email: &str,
    order_id: i64,
    scope: OptOutScope,
    run_started_at: DateTime<Utc>,
) -> Result<Option<SkipReason>> {
    // Opt-out may have been recorded after scheduling
    if preferences::is_opted_out(pool, recipient_email, scope).await? {
        return Ok(Some(SkipReason::CustomerOptedOut));
    }

    // The invoice may have been paid (or dropped from the cache entirely)
    let outstanding = crate::db::invoices::outstanding(pool, order_id).await?;
    if outstanding.unwrap_or(0.0) <= 0.0 {
        return Ok(Some(SkipReason::InvoicePaid));
    }

    // Per-address cooldown across campaigns. Sends recorded by the
    // current run are exempt: overlapping tiers may legitimately message
    // the same recipient twice within one invocation.
    if let Some(last_sent_raw) = schedules::last_sent_to(pool, recipient_email).await? {
        if let Ok(last_sent) = DateTime::parse_from_rfc3339(&last_sent_raw) {
            let last_sent = last_sent.with_timezone(&Utc);
            let cooldown = Duration::hours(config.cooldown_hours);
            if last_sent < run_started_at && Utc::now() - last_sent < cooldown {
                return Ok(Some(SkipReason::CooldownActive));
            }
        }
    }

    // Mid-run cap enforcement, production only
    if !config.test_mode {
        let now = Utc::now();
        let sent_today = schedules::sent_count_since(pool, &day_start_rfc3339(&now)).await?;
        if sent_today >= config.daily_send_cap {
            return Ok(Some(SkipReason::SendLimitReached));
        }
        let sent_last_hour =
            schedules::sent_count_since(pool, &(now - Duration::hours(1)).to_rfc3339()).await?;
        if sent_last_hour >= config.hourly_send_cap {
            return Ok(Some(SkipReason::SendLimitReached));
        }
    }

    Ok(None)
}

/// Emergency stop: atomically deactivate every campaign. Returns how many
/// were active.
pub async fn emergency_stop(pool: &SqlitePool) -> Result<u64> {
    let deactivated = campaigns::deactivate_all(pool).await?;
    tracing::warn!(deactivated, "Emergency stop: all campaigns deactivated");
    Ok(deactivated)
}

fn day_start_rfc3339(now: &DateTime<Utc>) -> String {
    format!("{}T00:00:00+00:00", now.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::invoices::{self, CachedInvoice};
    use crate::db::schedules::dedup_key;
    use chaser_common::db::init_memory_pool;
    use chrono::NaiveDate;

    async fn seed_invoice(pool: &SqlitePool, order_id: i64, outstanding: f64) {
        let invoice = CachedInvoice {
            order_id,
            order_ref: format!("SO-{order_id:04}"),
            invoice_number: None,
            order_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            tax_date: None,
            total_amount: 200.0,
            paid_amount: 200.0 - outstanding,
            outstanding,
            payment_status: 0,
            order_status: 1,
            shipping_status: None,
            stock_status: None,
            status_label: None,
            status_color: None,
            billing_name: None,
            billing_email: Some("ada@example.com".to_string()),
            billing_company: None,
            billing_contact_id: None,
            delivery_name: None,
            delivery_email: None,
            days_outstanding: 65,
            note_count: 0,
            has_payment_link: false,
            notes_synced_at: None,
            last_updated: "2026-08-08T00:00:00+00:00".to_string(),
        };
        invoices::upsert_invoice(pool, &invoice).await.unwrap();
    }

    #[tokio::test]
    async fn test_preflight_requires_sender_identity() {
        let pool = init_memory_pool().await.unwrap();

        let mut config = RunConfiguration::for_tests(false);
        config.sender_email = None;
        assert!(matches!(
            preflight(&pool, &config).await,
            Err(Error::Config(_))
        ));

        config.sender_email = Some("   ".to_string());
        assert!(matches!(
            preflight(&pool, &config).await,
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_preflight_passes_with_defaults() {
        let pool = init_memory_pool().await.unwrap();
        let report = preflight(&pool, &RunConfiguration::for_tests(false))
            .await
            .unwrap();
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_preflight_warns_on_zero_active_campaigns() {
        let pool = init_memory_pool().await.unwrap();
        campaigns::deactivate_all(&pool).await.unwrap();

        let report = preflight(&pool, &RunConfiguration::for_tests(false))
            .await
            .unwrap();
        assert!(report
            .warnings
            .iter()
            .any(|w| w.contains("no active campaigns")));
    }

    #[tokio::test]
    async fn test_preflight_cap_blocks_production_warns_test() {
        let pool = init_memory_pool().await.unwrap();

        // Record one send today, then set the cap to 1
        let key = dedup_key(1, 500, None);
        schedules::insert_pending(
            &pool,
            1,
            500,
            "x@example.com",
            Utc::now().date_naive(),
            false,
            &key,
        )
        .await
        .unwrap();
        let row = schedules::due_rows(&pool, Utc::now().date_naive(), false)
            .await
            .unwrap()
            .remove(0);
        schedules::mark_sent(&pool, row.id, &Utc::now().to_rfc3339(), "m-1")
            .await
            .unwrap();

        let mut config = RunConfiguration::for_tests(false);
        config.daily_send_cap = 1;
        assert!(matches!(
            preflight(&pool, &config).await,
            Err(Error::Config(_))
        ));

        let mut test_config = RunConfiguration::for_tests(true);
        test_config.daily_send_cap = 1;
        let report = preflight(&pool, &test_config).await.unwrap();
        assert!(report.warnings.iter().any(|w| w.contains("daily send cap")));
    }

    #[tokio::test]
    async fn test_send_check_invoice_paid() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 0.0).await;

        let skip = send_time_check(
            &pool,
            &RunConfiguration::for_tests(false),
            "ada@example.com",
            500,
            OptOutScope::Reminders,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(skip, Some(SkipReason::InvoicePaid));

        // An invoice dropped from the cache counts as paid too
        let skip = send_time_check(
            &pool,
            &RunConfiguration::for_tests(false),
            "ada@example.com",
            999,
            OptOutScope::Reminders,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(skip, Some(SkipReason::InvoicePaid));
    }

    #[tokio::test]
    async fn test_send_check_opt_out() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0).await;
        preferences::set_opt_out(&pool, "ada@example.com", false, true, false)
            .await
            .unwrap();

        let skip = send_time_check(
            &pool,
            &RunConfiguration::for_tests(false),
            "ada@example.com",
            500,
            OptOutScope::Reminders,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(skip, Some(SkipReason::CustomerOptedOut));

        // Collections scope is not suppressed by the reminders flag
        let skip = send_time_check(
            &pool,
            &RunConfiguration::for_tests(false),
            "ada@example.com",
            500,
            OptOutScope::Collections,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(skip, None);
    }

    #[tokio::test]
    async fn test_send_check_cooldown_applies_across_runs_only() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0).await;

        // A production send recorded an hour ago
        let key = dedup_key(2, 500, None);
        schedules::insert_pending(
            &pool,
            2,
            500,
            "ada@example.com",
            Utc::now().date_naive(),
            false,
            &key,
        )
        .await
        .unwrap();
        let row = schedules::due_rows(&pool, Utc::now().date_naive(), false)
            .await
            .unwrap()
            .remove(0);
        let an_hour_ago = (Utc::now() - Duration::hours(1)).to_rfc3339();
        schedules::mark_sent(&pool, row.id, &an_hour_ago, "m-1").await.unwrap();

        let config = RunConfiguration::for_tests(false);

        // A run started now sees the prior send inside the cooldown window
        let skip = send_time_check(
            &pool,
            &config,
            "ada@example.com",
            500,
            OptOutScope::Reminders,
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(skip, Some(SkipReason::CooldownActive));

        // A run started two hours ago treats it as its own send: exempt
        let skip = send_time_check(
            &pool,
            &config,
            "ada@example.com",
            500,
            OptOutScope::Reminders,
            Utc::now() - Duration::hours(2),
        )
        .await
        .unwrap();
        assert_eq!(skip, None);
    }

    #[tokio::test]
    async fn test_emergency_stop_deactivates_everything() {
        let pool = init_memory_pool().await.unwrap();
        assert_eq!(emergency_stop(&pool).await.unwrap(), 4);
        assert!(campaigns::list_active_ordered(&pool).await.unwrap().is_empty());
        assert_eq!(emergency_stop(&pool).await.unwrap(), 0);
    }
}
