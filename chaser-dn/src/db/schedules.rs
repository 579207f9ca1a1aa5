//! Scheduled send persistence (the dedup ledger)
//!
//! For one-shot tiers at most one live (pending or sent) non-test row may
//! ever exist per (campaign, invoice); for recurring tiers, per
//! (campaign, invoice, calendar day). The partial unique index created by
//! the migrations enforces this at the store, so insertion is a plain
//! `INSERT OR IGNORE` with no check-then-act race. Skipped and failed
//! rows do not occupy the key.

use chaser_common::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;

/// Attempt ceiling: rows that failed this many times are no longer due
pub const MAX_SEND_ATTEMPTS: i64 = 3;

/// Schedule row status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Pending => "pending",
            ScheduleStatus::Sent => "sent",
            ScheduleStatus::Failed => "failed",
            ScheduleStatus::Skipped => "skipped",
        }
    }
}

/// First-class skip outcomes, always recorded with the row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyScheduled,
    CustomerOptedOut,
    InvoicePaid,
    CooldownActive,
    SendLimitReached,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyScheduled => "already_scheduled",
            SkipReason::CustomerOptedOut => "customer_opted_out",
            SkipReason::InvoicePaid => "invoice_paid",
            SkipReason::CooldownActive => "cooldown_active",
            SkipReason::SendLimitReached => "send_limit_reached",
        }
    }
}

/// One scheduled send
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Schedule {
    pub id: i64,
    pub campaign_id: i64,
    pub order_id: i64,
    pub recipient_email: String,
    pub scheduled_date: NaiveDate,
    pub status: String,
    pub skip_reason: Option<String>,
    pub attempt_count: i64,
    pub last_attempt_at: Option<String>,
    pub sent_at: Option<String>,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub is_test: bool,
    pub dedup_key: String,
}

const SELECT_COLUMNS: &str = "id, campaign_id, order_id, recipient_email, scheduled_date, \
                              status, skip_reason, attempt_count, last_attempt_at, sent_at, \
                              message_id, error, is_test, dedup_key";

/// Dedup key for a (campaign, invoice) trigger instance. Recurring tiers
/// bucket by calendar day so each cadence step gets its own key.
pub fn dedup_key(campaign_id: i64, order_id: i64, day_bucket: Option<NaiveDate>) -> String {
    match day_bucket {
        Some(day) => format!("{campaign_id}:{order_id}:{day}"),
        None => format!("{campaign_id}:{order_id}"),
    }
}

/// Insert a pending schedule. Returns false when the dedup contract
/// already holds a live row for the key (the caller records an
/// `already_scheduled` skip in its stats).
///
/// Production rows rely entirely on the partial unique index. Test rows
/// sit outside the index predicate, so their dedup check runs here.
pub async fn insert_pending(
    pool: &SqlitePool,
    campaign_id: i64,
    order_id: i64,
    recipient_email: &str,
    scheduled_date: NaiveDate,
    is_test: bool,
    key: &str,
) -> Result<bool> {
    if is_test && has_live_row(pool, key, true).await? {
        return Ok(false);
    }

    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO dunning_schedules
            (campaign_id, order_id, recipient_email, scheduled_date,
             status, is_test, dedup_key)
        VALUES (?, ?, ?, ?, 'pending', ?, ?)
        "#,
    )
    .bind(campaign_id)
    .bind(order_id)
    .bind(recipient_email)
    .bind(scheduled_date)
    .bind(is_test)
    .bind(key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Whether a live (pending or sent) row exists for the key
pub async fn has_live_row(pool: &SqlitePool, key: &str, is_test: bool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM dunning_schedules
        WHERE dedup_key = ? AND is_test = ? AND status IN ('pending', 'sent')
        "#,
    )
    .bind(key)
    .bind(is_test)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// Record a scheduling-time skip (e.g. opt-out) so future runs see the
/// condition as handled. At most one skip row per key, day and reason.
pub async fn insert_skipped(
    pool: &SqlitePool,
    campaign_id: i64,
    order_id: i64,
    recipient_email: &str,
    scheduled_date: NaiveDate,
    is_test: bool,
    key: &str,
    reason: SkipReason,
) -> Result<bool> {
    let existing: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM dunning_schedules
        WHERE dedup_key = ? AND is_test = ? AND status = 'skipped'
          AND skip_reason = ? AND scheduled_date = ?
        "#,
    )
    .bind(key)
    .bind(is_test)
    .bind(reason.as_str())
    .bind(scheduled_date)
    .fetch_one(pool)
    .await?;
    if existing > 0 {
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO dunning_schedules
            (campaign_id, order_id, recipient_email, scheduled_date,
             status, skip_reason, is_test, dedup_key)
        VALUES (?, ?, ?, ?, 'skipped', ?, ?, ?)
        "#,
    )
    .bind(campaign_id)
    .bind(order_id)
    .bind(recipient_email)
    .bind(scheduled_date)
    .bind(reason.as_str())
    .bind(is_test)
    .bind(key)
    .execute(pool)
    .await?;

    Ok(true)
}

/// Rows due for the send pass: pending or retriable failed rows scheduled
/// today or earlier, below the attempt ceiling, in the matching test mode.
pub async fn due_rows(pool: &SqlitePool, today: NaiveDate, is_test: bool) -> Result<Vec<Schedule>> {
    let rows = sqlx::query_as::<_, Schedule>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM dunning_schedules
        WHERE status IN ('pending', 'failed')
          AND attempt_count < ?
          AND scheduled_date <= ?
          AND is_test = ?
        ORDER BY scheduled_date, id
        "#
    ))
    .bind(MAX_SEND_ATTEMPTS)
    .bind(today)
    .bind(is_test)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Increment the attempt counter before trying to send
pub async fn begin_attempt(pool: &SqlitePool, id: i64, now: &str) -> Result<()> {
    sqlx::query(
        "UPDATE dunning_schedules SET attempt_count = attempt_count + 1, last_attempt_at = ? WHERE id = ?",
    )
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_sent(pool: &SqlitePool, id: i64, now: &str, message_id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE dunning_schedules SET status = 'sent', sent_at = ?, message_id = ?, error = NULL WHERE id = ?",
    )
    .bind(now)
    .bind(message_id)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed(pool: &SqlitePool, id: i64, error: &str) -> Result<()> {
    sqlx::query("UPDATE dunning_schedules SET status = 'failed', error = ? WHERE id = ?")
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_skipped(pool: &SqlitePool, id: i64, reason: SkipReason) -> Result<()> {
    sqlx::query("UPDATE dunning_schedules SET status = 'skipped', skip_reason = ? WHERE id = ?")
        .bind(reason.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Production sends recorded at or after `since` (RFC 3339), for the
/// global send caps.
pub async fn sent_count_since(pool: &SqlitePool, since: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM dunning_schedules
        WHERE is_test = 0 AND status = 'sent' AND sent_at >= ?
        "#,
    )
    .bind(since)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Most recent production send timestamp for a recipient, for the
/// per-address cooldown.
pub async fn last_sent_to(pool: &SqlitePool, recipient_email: &str) -> Result<Option<String>> {
    let sent_at: Option<Option<String>> = sqlx::query_scalar(
        r#"
        SELECT MAX(sent_at) FROM dunning_schedules
        WHERE is_test = 0 AND status = 'sent' AND recipient_email = ?
        "#,
    )
    .bind(recipient_email)
    .fetch_optional(pool)
    .await?;
    Ok(sent_at.flatten())
}

/// Delete all test rows (end of a test-mode run)
pub async fn purge_test_rows(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM dunning_schedules WHERE is_test = 1")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Schedule listing for the admin surface
pub async fn list(
    pool: &SqlitePool,
    status: Option<&str>,
    campaign_id: Option<i64>,
    limit: i64,
) -> Result<Vec<Schedule>> {
    let rows = sqlx::query_as::<_, Schedule>(&format!(
        r#"
        SELECT {SELECT_COLUMNS} FROM dunning_schedules
        WHERE (? IS NULL OR status = ?)
          AND (? IS NULL OR campaign_id = ?)
        ORDER BY id DESC
        LIMIT ?
        "#
    ))
    .bind(status)
    .bind(status)
    .bind(campaign_id)
    .bind(campaign_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaser_common::db::init_memory_pool;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_one_shot_dedup_holds_forever() {
        let pool = init_memory_pool().await.unwrap();
        let key = dedup_key(1, 500, None);
        let today = day(2026, 8, 8);

        assert!(
            insert_pending(&pool, 1, 500, "ada@example.com", today, false, &key)
                .await
                .unwrap()
        );
        // Same trigger instance again: refused
        assert!(
            !insert_pending(&pool, 1, 500, "ada@example.com", today, false, &key)
                .await
                .unwrap()
        );

        // Still refused after the row was sent
        let rows = due_rows(&pool, today, false).await.unwrap();
        mark_sent(&pool, rows[0].id, "2026-08-08T12:00:00+00:00", "msg-1")
            .await
            .unwrap();
        assert!(
            !insert_pending(&pool, 1, 500, "ada@example.com", today, false, &key)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_recurring_dedup_buckets_by_day() {
        let pool = init_memory_pool().await.unwrap();
        let day1 = day(2026, 8, 8);
        let day2 = day(2026, 8, 18);

        let key1 = dedup_key(4, 500, Some(day1));
        let key2 = dedup_key(4, 500, Some(day2));
        assert_ne!(key1, key2);

        assert!(insert_pending(&pool, 4, 500, "a@x.com", day1, false, &key1)
            .await
            .unwrap());
        assert!(!insert_pending(&pool, 4, 500, "a@x.com", day1, false, &key1)
            .await
            .unwrap());
        // Next cadence step is a fresh key
        assert!(insert_pending(&pool, 4, 500, "a@x.com", day2, false, &key2)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_skipped_rows_do_not_block_scheduling() {
        let pool = init_memory_pool().await.unwrap();
        let key = dedup_key(1, 500, None);
        let today = day(2026, 8, 8);

        assert!(insert_skipped(
            &pool,
            1,
            500,
            "ada@example.com",
            today,
            false,
            &key,
            SkipReason::CustomerOptedOut
        )
        .await
        .unwrap());
        // Same skip same day recorded once only
        assert!(!insert_skipped(
            &pool,
            1,
            500,
            "ada@example.com",
            today,
            false,
            &key,
            SkipReason::CustomerOptedOut
        )
        .await
        .unwrap());

        // A skip does not occupy the dedup key
        assert!(
            insert_pending(&pool, 1, 500, "ada@example.com", today, false, &key)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_test_rows_isolated_from_production() {
        let pool = init_memory_pool().await.unwrap();
        let key = dedup_key(1, 500, None);
        let today = day(2026, 8, 8);

        assert!(insert_pending(&pool, 1, 500, "a@x.com", today, false, &key)
            .await
            .unwrap());
        // Test row with the same key is allowed once
        assert!(insert_pending(&pool, 1, 500, "a@x.com", today, true, &key)
            .await
            .unwrap());
        assert!(!insert_pending(&pool, 1, 500, "a@x.com", today, true, &key)
            .await
            .unwrap());

        // Due selection respects the mode
        assert_eq!(due_rows(&pool, today, false).await.unwrap().len(), 1);
        assert_eq!(due_rows(&pool, today, true).await.unwrap().len(), 1);

        assert_eq!(purge_test_rows(&pool).await.unwrap(), 1);
        assert_eq!(due_rows(&pool, today, false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_due_rows_respect_attempt_ceiling() {
        let pool = init_memory_pool().await.unwrap();
        let key = dedup_key(1, 500, None);
        let today = day(2026, 8, 8);

        insert_pending(&pool, 1, 500, "a@x.com", today, false, &key)
            .await
            .unwrap();
        let id = due_rows(&pool, today, false).await.unwrap()[0].id;

        for attempt in 1..=MAX_SEND_ATTEMPTS {
            let due = due_rows(&pool, today, false).await.unwrap();
            assert_eq!(due.len(), 1, "attempt {attempt} should still be due");
            begin_attempt(&pool, id, "2026-08-08T12:00:00+00:00")
                .await
                .unwrap();
            mark_failed(&pool, id, "smtp unreachable").await.unwrap();
        }

        // Attempt ceiling reached: no longer selected
        assert!(due_rows(&pool, today, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_future_rows_not_due() {
        let pool = init_memory_pool().await.unwrap();
        let key = dedup_key(1, 500, None);

        insert_pending(&pool, 1, 500, "a@x.com", day(2026, 8, 10), false, &key)
            .await
            .unwrap();

        assert!(due_rows(&pool, day(2026, 8, 9), false)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            due_rows(&pool, day(2026, 8, 10), false).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_cooldown_and_cap_queries() {
        let pool = init_memory_pool().await.unwrap();
        let today = day(2026, 8, 8);

        let key = dedup_key(1, 500, None);
        insert_pending(&pool, 1, 500, "ada@example.com", today, false, &key)
            .await
            .unwrap();
        let id = due_rows(&pool, today, false).await.unwrap()[0].id;
        mark_sent(&pool, id, "2026-08-08T10:00:00+00:00", "msg-1")
            .await
            .unwrap();

        assert_eq!(
            sent_count_since(&pool, "2026-08-08T00:00:00+00:00")
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            sent_count_since(&pool, "2026-08-08T11:00:00+00:00")
                .await
                .unwrap(),
            0
        );

        assert_eq!(
            last_sent_to(&pool, "ada@example.com").await.unwrap(),
            Some("2026-08-08T10:00:00+00:00".to_string())
        );
        assert_eq!(last_sent_to(&pool, "other@example.com").await.unwrap(), None);
    }
}
