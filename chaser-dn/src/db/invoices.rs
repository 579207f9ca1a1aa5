//! Cached invoice persistence
//!
//! The denormalized snapshot table the whole campaign engine reads from.
//! Rows are keyed by ERP order id; the synchronizer owns all writes.

use chaser_common::Result;
use chrono::NaiveDate;
use sqlx::SqlitePool;
use std::collections::HashSet;

/// One denormalized open-invoice snapshot
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CachedInvoice {
    pub order_id: i64,
    pub order_ref: String,
    pub invoice_number: Option<String>,
    pub order_date: NaiveDate,
    pub tax_date: Option<NaiveDate>,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub outstanding: f64,
    pub payment_status: i64,
    pub order_status: i64,
    pub shipping_status: Option<i64>,
    pub stock_status: Option<i64>,
    pub status_label: Option<String>,
    pub status_color: Option<String>,
    pub billing_name: Option<String>,
    pub billing_email: Option<String>,
    pub billing_company: Option<String>,
    pub billing_contact_id: Option<i64>,
    pub delivery_name: Option<String>,
    pub delivery_email: Option<String>,
    pub days_outstanding: i64,
    pub note_count: i64,
    pub has_payment_link: bool,
    pub notes_synced_at: Option<String>,
    pub last_updated: String,
}

/// Set of order ids currently present in the cache
pub async fn existing_order_ids(pool: &SqlitePool) -> Result<HashSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT order_id FROM cached_invoices")
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().collect())
}

/// Insert-or-update one snapshot, keyed by order id.
///
/// Enrichment-owned columns (note_count, has_payment_link,
/// notes_synced_at) are deliberately NOT overwritten on conflict so a
/// re-sync does not discard enrichment progress.
pub async fn upsert_invoice(pool: &SqlitePool, invoice: &CachedInvoice) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cached_invoices (
            order_id, order_ref, invoice_number, order_date, tax_date,
            total_amount, paid_amount, outstanding,
            payment_status, order_status, shipping_status, stock_status,
            status_label, status_color,
            billing_name, billing_email, billing_company, billing_contact_id,
            delivery_name, delivery_email,
            days_outstanding, note_count, has_payment_link, notes_synced_at,
            last_updated
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(order_id) DO UPDATE SET
            order_ref = excluded.order_ref,
            invoice_number = excluded.invoice_number,
            order_date = excluded.order_date,
            tax_date = excluded.tax_date,
            total_amount = excluded.total_amount,
            paid_amount = excluded.paid_amount,
            outstanding = excluded.outstanding,
            payment_status = excluded.payment_status,
            order_status = excluded.order_status,
            shipping_status = excluded.shipping_status,
            stock_status = excluded.stock_status,
            status_label = excluded.status_label,
            status_color = excluded.status_color,
            billing_name = excluded.billing_name,
            billing_email = excluded.billing_email,
            billing_company = excluded.billing_company,
            billing_contact_id = excluded.billing_contact_id,
            delivery_name = excluded.delivery_name,
            delivery_email = excluded.delivery_email,
            days_outstanding = excluded.days_outstanding,
            last_updated = excluded.last_updated
        "#,
    )
    .bind(invoice.order_id)
    .bind(&invoice.order_ref)
    .bind(&invoice.invoice_number)
    .bind(invoice.order_date)
    .bind(invoice.tax_date)
    .bind(invoice.total_amount)
    .bind(invoice.paid_amount)
    .bind(invoice.outstanding)
    .bind(invoice.payment_status)
    .bind(invoice.order_status)
    .bind(invoice.shipping_status)
    .bind(invoice.stock_status)
    .bind(&invoice.status_label)
    .bind(&invoice.status_color)
    .bind(&invoice.billing_name)
    .bind(&invoice.billing_email)
    .bind(&invoice.billing_company)
    .bind(invoice.billing_contact_id)
    .bind(&invoice.delivery_name)
    .bind(&invoice.delivery_email)
    .bind(invoice.days_outstanding)
    .bind(invoice.note_count)
    .bind(invoice.has_payment_link)
    .bind(&invoice.notes_synced_at)
    .bind(&invoice.last_updated)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete invoices (and their cached notes) that are no longer open
/// upstream. Payment links are kept: link construction is idempotent and
/// a re-opened order must not get a second URL.
pub async fn delete_by_ids(pool: &SqlitePool, order_ids: &[i64]) -> Result<u64> {
    let mut deleted = 0u64;

    // Bounded IN-lists keep statements small
    for chunk in order_ids.chunks(100) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let notes_sql = format!("DELETE FROM invoice_notes WHERE order_id IN ({placeholders})");
        let invoices_sql =
            format!("DELETE FROM cached_invoices WHERE order_id IN ({placeholders})");

        let mut delete_notes = sqlx::query(&notes_sql);
        for id in chunk {
            delete_notes = delete_notes.bind(id);
        }
        delete_notes.execute(pool).await?;

        let mut delete_invoices = sqlx::query(&invoices_sql);
        for id in chunk {
            delete_invoices = delete_invoices.bind(id);
        }
        deleted += delete_invoices.execute(pool).await?.rows_affected();
    }

    Ok(deleted)
}

/// Load one snapshot
pub async fn get(pool: &SqlitePool, order_id: i64) -> Result<Option<CachedInvoice>> {
    let invoice = sqlx::query_as::<_, CachedInvoice>(
        "SELECT * FROM cached_invoices WHERE order_id = ?",
    )
    .bind(order_id)
    .fetch_optional(pool)
    .await?;
    Ok(invoice)
}

/// Current outstanding balance for an order, if still cached
pub async fn outstanding(pool: &SqlitePool, order_id: i64) -> Result<Option<f64>> {
    let amount: Option<f64> =
        sqlx::query_scalar("SELECT outstanding FROM cached_invoices WHERE order_id = ?")
            .bind(order_id)
            .fetch_optional(pool)
            .await?;
    Ok(amount)
}

/// Candidate invoices for campaign scheduling: outstanding balance,
/// a recipient address, and at least `min_days` outstanding.
pub async fn list_candidates(pool: &SqlitePool, min_days: i64) -> Result<Vec<CachedInvoice>> {
    let invoices = sqlx::query_as::<_, CachedInvoice>(
        r#"
        SELECT * FROM cached_invoices
        WHERE outstanding > 0
          AND billing_email IS NOT NULL
          AND billing_email <> ''
          AND days_outstanding >= ?
        ORDER BY days_outstanding DESC, order_id
        "#,
    )
    .bind(min_days)
    .fetch_all(pool)
    .await?;
    Ok(invoices)
}

/// Orders whose cached notes are absent or older than the staleness
/// cutoff (RFC 3339 timestamp).
pub async fn list_notes_stale(pool: &SqlitePool, cutoff: &str) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT order_id FROM cached_invoices
        WHERE notes_synced_at IS NULL OR notes_synced_at < ?
        ORDER BY order_id
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Orders with no payment link recorded yet
pub async fn list_missing_payment_link(pool: &SqlitePool) -> Result<Vec<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT ci.order_id FROM cached_invoices ci
        LEFT JOIN payment_links pl ON pl.order_id = ci.order_id
        WHERE pl.url IS NULL OR pl.url = ''
        ORDER BY ci.order_id
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// Record a completed notes refresh for an order
pub async fn mark_notes_synced(
    pool: &SqlitePool,
    order_id: i64,
    note_count: i64,
    synced_at: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE cached_invoices SET note_count = ?, notes_synced_at = ? WHERE order_id = ?",
    )
    .bind(note_count)
    .bind(synced_at)
    .bind(order_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Flag that an order now has a payment link
pub async fn mark_has_payment_link(pool: &SqlitePool, order_id: i64) -> Result<()> {
    sqlx::query("UPDATE cached_invoices SET has_payment_link = 1 WHERE order_id = ?")
        .bind(order_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Total cached invoice count
pub async fn count(pool: &SqlitePool) -> Result<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_invoices")
        .fetch_one(pool)
        .await?;
    Ok(n)
}
