//! Campaign scheduling over the cached invoice set
//!
//! For one active campaign, walks the candidate invoices (outstanding
//! balance, recipient email, minimum age) and converts eligibility into
//! persisted schedule rows. The dedup contract is checked up front for
//! the `already_scheduled` skip and enforced again by the store's unique
//! index at insert time, so a concurrent run cannot double-schedule.

use crate::config::RunConfiguration;
use crate::db::campaigns::Campaign;
use crate::db::preferences::{self, OptOutScope};
use crate::db::schedules::{self, SkipReason};
use crate::db::invoices;
use crate::services::eligibility;
use chaser_common::Result;
use chrono::Utc;
use sqlx::SqlitePool;

/// Scheduling outcome for one campaign
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleStats {
    /// Candidate invoices evaluated
    pub processed: u64,
    /// Pending rows created
    pub scheduled: u64,
    /// Skips (already scheduled, opted out)
    pub skipped: u64,
}

/// Campaign scheduler service
pub struct CampaignScheduler {
    db: SqlitePool,
}

impl CampaignScheduler {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Run the schedule pass for one campaign.
    pub async fn schedule_campaign(
        &self,
        campaign: &Campaign,
        config: &RunConfiguration,
    ) -> Result<ScheduleStats> {
        let mut stats = ScheduleStats::default();

        let Some(kind) = campaign.campaign_kind() else {
            tracing::warn!(
                campaign_id = campaign.id,
                kind = %campaign.kind,
                "Skipping campaign with unknown kind"
            );
            return Ok(stats);
        };

        let today = Utc::now().date_naive();
        let candidates = invoices::list_candidates(&self.db, config.min_days_outstanding).await?;

        tracing::debug!(
            campaign_id = campaign.id,
            candidates = candidates.len(),
            "Schedule pass starting"
        );

        let scope = if kind.is_reminder() {
            OptOutScope::Reminders
        } else {
            OptOutScope::Collections
        };

        let mut created: u64 = 0;

        for invoice in &candidates {
            if config.test_mode && created >= config.test_schedule_cap {
                tracing::info!(
                    campaign_id = campaign.id,
                    cap = config.test_schedule_cap,
                    "Test-mode schedule cap reached for campaign"
                );
                break;
            }

            stats.processed += 1;

            if !eligibility::is_eligible(invoice.days_outstanding, campaign) {
                continue;
            }

            // Candidates are pre-filtered on a non-empty billing email
            let recipient = invoice
                .billing_email
                .as_deref()
                .unwrap_or_default()
                .to_lowercase();

            let day_bucket = kind.is_recurring().then_some(today);
            let key = schedules::dedup_key(campaign.id, invoice.order_id, day_bucket);

            // Dedup first: an existing live row wins over every other check
            if schedules::has_live_row(&self.db, &key, config.test_mode).await? {
                tracing::debug!(
                    campaign_id = campaign.id,
                    order_id = invoice.order_id,
                    "Already scheduled, skipping"
                );
                stats.skipped += 1;
                continue;
            }

            // Opt-out produces a persisted skip row so future runs see the
            // condition as handled; it does not block re-evaluation.
            if preferences::is_opted_out(&self.db, &recipient, scope).await? {
                schedules::insert_skipped(
                    &self.db,
                    campaign.id,
                    invoice.order_id,
                    &recipient,
                    today,
                    config.test_mode,
                    &key,
                    SkipReason::CustomerOptedOut,
                )
                .await?;
                stats.skipped += 1;
                continue;
            }

            // The unique index still guards the insert against races
            if schedules::insert_pending(
                &self.db,
                campaign.id,
                invoice.order_id,
                &recipient,
                today,
                config.test_mode,
                &key,
            )
            .await?
            {
                stats.scheduled += 1;
                created += 1;
            } else {
                stats.skipped += 1;
            }
        }

        tracing::info!(
            campaign_id = campaign.id,
            processed = stats.processed,
            scheduled = stats.scheduled,
            skipped = stats.skipped,
            "Schedule pass complete"
        );

        Ok(stats)
    }
}
