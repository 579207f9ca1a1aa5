//! Database schema for the Chaser cache store
//!
//! All tables are created with `CREATE TABLE IF NOT EXISTS` so repeated
//! startup is harmless. The dedup contract for dunning schedules is
//! enforced here, at the store level, by a partial unique index over
//! `dedup_key`: inserts use `INSERT OR IGNORE`, which removes the
//! check-then-act race between concurrent or re-entrant runs.

use crate::Result;
use sqlx::SqlitePool;

/// Create all Chaser tables and indexes, then seed the default campaign
/// tiers. Safe to call on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Initializing Chaser database schema");

    create_tables(pool).await?;
    create_indexes(pool).await?;
    seed_default_campaigns(pool).await?;

    Ok(())
}

async fn create_tables(pool: &SqlitePool) -> Result<()> {
    // Denormalized invoice snapshots. A row exists here if and only if the
    // corresponding ERP order is currently open; rows absent from the
    // latest sync fetch are deleted.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cached_invoices (
            order_id INTEGER PRIMARY KEY,
            order_ref TEXT NOT NULL,
            invoice_number TEXT,
            order_date TEXT NOT NULL,
            tax_date TEXT,
            total_amount REAL NOT NULL DEFAULT 0,
            paid_amount REAL NOT NULL DEFAULT 0,
            outstanding REAL NOT NULL DEFAULT 0,
            payment_status INTEGER NOT NULL DEFAULT 0,
            order_status INTEGER NOT NULL DEFAULT 0,
            shipping_status INTEGER,
            stock_status INTEGER,
            status_label TEXT,
            status_color TEXT,
            billing_name TEXT,
            billing_email TEXT,
            billing_company TEXT,
            billing_contact_id INTEGER,
            delivery_name TEXT,
            delivery_email TEXT,
            days_outstanding INTEGER NOT NULL DEFAULT 0,
            note_count INTEGER NOT NULL DEFAULT 0,
            has_payment_link INTEGER NOT NULL DEFAULT 0,
            notes_synced_at TEXT,
            last_updated TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (order, external note id). Resolved contact/author
    // fields stay NULL until enrichment fills them in.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_notes (
            order_id INTEGER NOT NULL,
            note_id INTEGER NOT NULL,
            note_text TEXT,
            contact_id INTEGER,
            author_id INTEGER,
            contact_name TEXT,
            contact_email TEXT,
            contact_company TEXT,
            author_name TEXT,
            author_email TEXT,
            author_company TEXT,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (order_id, note_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Constructed payment URLs, write-once per order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payment_links (
            order_id INTEGER PRIMARY KEY,
            url TEXT NOT NULL,
            contact_id INTEGER,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL,
            trigger_days INTEGER NOT NULL,
            recurring_interval_days INTEGER,
            active INTEGER NOT NULL DEFAULT 0,
            subject_template TEXT NOT NULL,
            body_template TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Dedup ledger. dedup_key is campaign:order for one-shot tiers and
    // campaign:order:date for recurring tiers.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dunning_schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            campaign_id INTEGER NOT NULL,
            order_id INTEGER NOT NULL,
            recipient_email TEXT NOT NULL,
            scheduled_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            skip_reason TEXT,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TEXT,
            sent_at TEXT,
            message_id TEXT,
            error TEXT,
            is_test INTEGER NOT NULL DEFAULT 0,
            dedup_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS customer_preferences (
            email TEXT PRIMARY KEY,
            opted_out_all INTEGER NOT NULL DEFAULT 0,
            opted_out_reminders INTEGER NOT NULL DEFAULT 0,
            opted_out_collections INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS dunning_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trigger_source TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            is_test INTEGER NOT NULL DEFAULT 0,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            processed INTEGER NOT NULL DEFAULT 0,
            scheduled INTEGER NOT NULL DEFAULT 0,
            sent INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<()> {
    // The dedup contract: at most one live (pending or sent) non-test row
    // per dedup_key. Skipped and failed rows do not occupy the key.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_schedules_dedup
        ON dunning_schedules(dedup_key)
        WHERE is_test = 0 AND status IN ('pending', 'sent')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_schedules_due
        ON dunning_schedules(status, scheduled_date, is_test)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_schedules_recipient
        ON dunning_schedules(recipient_email, status, sent_at)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_invoices_days
        ON cached_invoices(days_outstanding, outstanding)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed the four default campaign tiers. `INSERT OR IGNORE` keyed on the
/// unique name, so operator edits (templates, active flag) survive
/// restarts.
async fn seed_default_campaigns(pool: &SqlitePool) -> Result<()> {
    let defaults: [(&str, &str, i64, Option<i64>, &str, &str); 4] = [
        (
            "Reminder 31-60",
            "reminder_31_60",
            30,
            None,
            "Payment reminder: invoice {{INVOICE_NUMBER}}",
            "Dear {{CUSTOMER_NAME}},\n\nOur records show invoice {{INVOICE_NUMBER}} \
             ({{ORDER_REF}}) has an outstanding balance of {{AMOUNT_DUE}}, now \
             {{DAYS_OUTSTANDING}} days past due.\n\nYou can pay online: {{PAYMENT_LINK}}\n\n\
             If you have already paid, please disregard this message.\n\n{{OPTOUT_LINK}}",
        ),
        (
            "Reminder 61-90",
            "reminder_61_90",
            60,
            None,
            "Second reminder: invoice {{INVOICE_NUMBER}} is {{DAYS_OUTSTANDING}} days overdue",
            "Dear {{CUSTOMER_NAME}},\n\nDespite an earlier reminder, invoice \
             {{INVOICE_NUMBER}} ({{ORDER_REF}}) still shows {{AMOUNT_DUE}} outstanding \
             after {{DAYS_OUTSTANDING}} days.\n\nPlease settle the balance promptly: \
             {{PAYMENT_LINK}}\n\n{{OPTOUT_LINK}}",
        ),
        (
            "Final notice 91+",
            "collection_91_once",
            90,
            None,
            "Final notice: invoice {{INVOICE_NUMBER}}",
            "Dear {{CUSTOMER_NAME}},\n\nInvoice {{INVOICE_NUMBER}} ({{ORDER_REF}}) remains \
             unpaid with {{AMOUNT_DUE}} outstanding for {{DAYS_OUTSTANDING}} days. Unless \
             payment is received shortly, the account will be passed to collections.\n\n\
             Pay now: {{PAYMENT_LINK}}\n\n{{OPTOUT_LINK}}",
        ),
        (
            "Collections follow-up",
            "collection_91_recurring",
            91,
            Some(10),
            "Outstanding balance on invoice {{INVOICE_NUMBER}}",
            "Dear {{CUSTOMER_NAME}},\n\nThis is a follow-up regarding the unpaid balance of \
             {{AMOUNT_DUE}} on invoice {{INVOICE_NUMBER}} ({{ORDER_REF}}), now \
             {{DAYS_OUTSTANDING}} days outstanding.\n\nPay now: {{PAYMENT_LINK}}\n\n{{OPTOUT_LINK}}",
        ),
    ];

    for (name, kind, trigger_days, interval, subject, body) in defaults {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO campaigns
                (name, kind, trigger_days, recurring_interval_days, active,
                 subject_template, body_template)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(name)
        .bind(kind)
        .bind(trigger_days)
        .bind(interval)
        .bind(subject)
        .bind(body)
        .execute(pool)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup() -> SqlitePool {
        crate::db::init_memory_pool().await.unwrap()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = setup().await;
        // Second run must not fail or duplicate seeded campaigns
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM campaigns")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn test_default_campaigns_seeded_active() {
        let pool = setup().await;

        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM campaigns WHERE active = 1")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(active, 4);

        let interval: Option<i64> = sqlx::query_scalar(
            "SELECT recurring_interval_days FROM campaigns WHERE kind = 'collection_91_recurring'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(interval, Some(10));
    }

    #[tokio::test]
    async fn test_dedup_index_blocks_duplicate_live_rows() {
        let pool = setup().await;

        let insert = |status: &'static str, is_test: i64| {
            let pool = pool.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO dunning_schedules
                        (campaign_id, order_id, recipient_email, scheduled_date,
                         status, is_test, dedup_key)
                    VALUES (1, 500, 'x@example.com', '2026-08-08', ?, ?, '1:500')
                    "#,
                )
                .bind(status)
                .bind(is_test)
                .execute(&pool)
                .await
                .unwrap()
                .rows_affected()
            }
        };

        assert_eq!(insert("pending", 0).await, 1);
        // Second live row with the same key is ignored
        assert_eq!(insert("pending", 0).await, 0);
        // Test rows do not collide with production rows
        assert_eq!(insert("pending", 1).await, 1);
        // Skipped rows do not occupy the key
        assert_eq!(insert("skipped", 0).await, 1);
    }

    #[tokio::test]
    async fn test_seeded_campaign_edits_survive_reruns() {
        let pool = setup().await;

        sqlx::query("UPDATE campaigns SET active = 0, subject_template = 'edited' WHERE kind = 'reminder_31_60'")
            .execute(&pool)
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();

        let (active, subject): (i64, String) = sqlx::query_as(
            "SELECT active, subject_template FROM campaigns WHERE kind = 'reminder_31_60'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(active, 0);
        assert_eq!(subject, "edited");
    }
}
