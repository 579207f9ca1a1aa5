//! Campaign definition persistence
//!
//! Campaign rows are seeded by the migrations and mutated only through
//! the explicit admin operations here; the synchronizer never touches
//! them.

use chaser_common::Result;
use sqlx::SqlitePool;

/// Machine type tag of a campaign tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignKind {
    /// Reminder window, 31-60 days outstanding
    Reminder31to60,
    /// Reminder window, 61-90 days outstanding
    Reminder61to90,
    /// One-shot late-stage notice, 91+ days
    Collection91Once,
    /// Recurring late-stage follow-up on a fixed cadence
    Collection91Recurring,
}

impl CampaignKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignKind::Reminder31to60 => "reminder_31_60",
            CampaignKind::Reminder61to90 => "reminder_61_90",
            CampaignKind::Collection91Once => "collection_91_once",
            CampaignKind::Collection91Recurring => "collection_91_recurring",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "reminder_31_60" => Some(CampaignKind::Reminder31to60),
            "reminder_61_90" => Some(CampaignKind::Reminder61to90),
            "collection_91_once" => Some(CampaignKind::Collection91Once),
            "collection_91_recurring" => Some(CampaignKind::Collection91Recurring),
            _ => None,
        }
    }

    /// Recurring tiers re-fire on a cadence; everything else is one-shot
    pub fn is_recurring(&self) -> bool {
        matches!(self, CampaignKind::Collection91Recurring)
    }

    /// Reminder tiers respect the reminders opt-out; collection tiers the
    /// collections opt-out.
    pub fn is_reminder(&self) -> bool {
        matches!(
            self,
            CampaignKind::Reminder31to60 | CampaignKind::Reminder61to90
        )
    }
}

/// One dunning campaign tier
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub kind: String,
    pub trigger_days: i64,
    pub recurring_interval_days: Option<i64>,
    pub active: bool,
    pub subject_template: String,
    pub body_template: String,
}

impl Campaign {
    /// Parsed machine tag; `None` for rows with an unknown kind
    pub fn campaign_kind(&self) -> Option<CampaignKind> {
        CampaignKind::parse(&self.kind)
    }
}

const SELECT_COLUMNS: &str = "id, name, kind, trigger_days, recurring_interval_days, \
                              active, subject_template, body_template";

/// All campaigns, ascending trigger day
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Campaign>> {
    let campaigns = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {SELECT_COLUMNS} FROM campaigns ORDER BY trigger_days, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(campaigns)
}

/// Active campaigns in processing order (ascending trigger day)
pub async fn list_active_ordered(pool: &SqlitePool) -> Result<Vec<Campaign>> {
    let campaigns = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {SELECT_COLUMNS} FROM campaigns WHERE active = 1 ORDER BY trigger_days, id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(campaigns)
}

/// Load one campaign
pub async fn get(pool: &SqlitePool, id: i64) -> Result<Option<Campaign>> {
    let campaign = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {SELECT_COLUMNS} FROM campaigns WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(campaign)
}

/// Enable or disable a campaign. Returns false when the id is unknown.
pub async fn set_active(pool: &SqlitePool, id: i64, active: bool) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE campaigns SET active = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
    )
    .bind(active)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace a campaign's subject and body templates
pub async fn update_templates(
    pool: &SqlitePool,
    id: i64,
    subject_template: &str,
    body_template: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET subject_template = ?, body_template = ?, updated_at = CURRENT_TIMESTAMP
        WHERE id = ?
        "#,
    )
    .bind(subject_template)
    .bind(body_template)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Emergency stop: deactivate every campaign in one statement
pub async fn deactivate_all(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE campaigns SET active = 0, updated_at = CURRENT_TIMESTAMP WHERE active = 1",
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
