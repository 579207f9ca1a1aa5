//! Campaign eligibility
//!
//! A pure decision over (days outstanding, campaign definition). Window
//! boundaries are inclusive on both sides, so exactly 60 days outstanding
//! matches both reminder windows; the dedup ledger deliberately does not
//! resolve that overlap, because each campaign deduplicates on its own.

use crate::db::campaigns::{Campaign, CampaignKind};

/// Fallback cadence for recurring tiers without a configured interval
pub const DEFAULT_RECURRING_INTERVAL_DAYS: i64 = 10;

/// Recurring tiers only start firing from this many days outstanding
const RECURRING_FLOOR_DAYS: i64 = 101;

/// Offset the recurring cadence is anchored to
const RECURRING_ANCHOR_DAYS: i64 = 91;

/// Whether an invoice at `days_outstanding` belongs to `campaign`'s tier.
pub fn is_eligible(days_outstanding: i64, campaign: &Campaign) -> bool {
    let Some(kind) = campaign.campaign_kind() else {
        tracing::warn!(
            campaign_id = campaign.id,
            kind = %campaign.kind,
            "Campaign has unknown kind, treating as ineligible"
        );
        return false;
    };

    match kind {
        CampaignKind::Reminder31to60 => (30..=60).contains(&days_outstanding),
        CampaignKind::Reminder61to90 => (60..=90).contains(&days_outstanding),
        CampaignKind::Collection91Once => days_outstanding >= 90,
        CampaignKind::Collection91Recurring => {
            let interval = campaign
                .recurring_interval_days
                .filter(|i| *i > 0)
                .unwrap_or(DEFAULT_RECURRING_INTERVAL_DAYS);
            days_outstanding >= RECURRING_FLOOR_DAYS
                && (days_outstanding - RECURRING_ANCHOR_DAYS) % interval == 0
        }
    }
}
