//! Incremental cache synchronization
//!
//! Reconciles the ERP's open-invoice set into the local cache:
//!
//! 1. Fetch the complete current set of open invoices, paging through the
//!    adapter. Any fetch failure aborts the sync before anything is
//!    deleted, leaving the prior cache state untouched.
//! 2. Delete cached invoices absent from the fetched set (no longer open).
//! 3. Upsert every fetched record in fixed-size batches; a failure on one
//!    row is logged and the batch continues.
//!
//! `days_outstanding` and the outstanding balance are recomputed from the
//! fetched record on every sync so downstream filtering always reflects
//! current time, not a stale cache read.

use crate::config::RunConfiguration;
use crate::db::invoices::{self, CachedInvoice};
use crate::erp::{DateRange, ErpClient, ErpError, ErpInvoice};
use crate::services::status_catalog::StatusCatalog;
use chaser_common::{Error, Result, RetryPolicy};
use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;

/// Upper bound on listing pages, as a runaway guard
const MAX_PAGES: u32 = 1000;

/// Reconciliation outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub total: u64,
}

/// Cache synchronizer service
pub struct CacheSynchronizer {
    db: SqlitePool,
    erp: Arc<dyn ErpClient>,
    retry: RetryPolicy,
}

impl CacheSynchronizer {
    pub fn new(db: SqlitePool, erp: Arc<dyn ErpClient>) -> Self {
        Self {
            db,
            erp,
            retry: RetryPolicy::default(),
        }
    }

    /// Run one full reconciliation cycle and return the summary.
    pub async fn synchronize(
        &self,
        catalog: &StatusCatalog,
        config: &RunConfiguration,
    ) -> Result<SyncSummary> {
        let today = Utc::now().date_naive();
        let range = DateRange {
            from: today - chrono::Duration::days(config.lookback_days),
            to: today,
        };

        // Fetch everything up front; deletion only happens on a complete
        // picture of what is still open.
        let records = self.fetch_all_open(&range).await?;
        let current_ids: HashSet<i64> = records.iter().map(|r| r.order_id).collect();

        let existing_ids = invoices::existing_order_ids(&self.db).await?;

        let to_delete: Vec<i64> = existing_ids.difference(&current_ids).copied().collect();
        let deleted = if to_delete.is_empty() {
            0
        } else {
            invoices::delete_by_ids(&self.db, &to_delete).await?
        };

        let mut summary = SyncSummary {
            deleted,
            total: records.len() as u64,
            ..Default::default()
        };

        let now = Utc::now().to_rfc3339();
        for batch in records.chunks(config.sync_batch_size.max(1)) {
            for record in batch {
                let snapshot = build_snapshot(record, catalog, today, &now);
                match invoices::upsert_invoice(&self.db, &snapshot).await {
                    Ok(()) => {
                        if existing_ids.contains(&record.order_id) {
                            summary.updated += 1;
                        } else {
                            summary.inserted += 1;
                        }
                    }
                    Err(e) => {
                        // One bad row must not abort the reconciliation
                        tracing::error!(
                            order_id = record.order_id,
                            error = %e,
                            "Failed to upsert invoice snapshot, continuing"
                        );
                    }
                }
            }
            tracing::debug!(
                batch_size = batch.len(),
                inserted = summary.inserted,
                updated = summary.updated,
                "Sync batch committed"
            );
        }

        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            total = summary.total,
            "Cache synchronization complete"
        );

        Ok(summary)
    }

    async fn fetch_all_open(&self, range: &DateRange) -> Result<Vec<ErpInvoice>> {
        let mut records = Vec::new();
        let mut page = 1u32;

        loop {
            let fetched = self
                .retry
                .run("erp list_open_invoices", |e: &ErpError| e.is_transient(), || {
                    self.erp.list_open_invoices(range, page)
                })
                .await
                .map_err(|e| Error::Upstream(format!("invoice listing page {page}: {e}")))?;

            tracing::debug!(page, count = fetched.items.len(), "Fetched invoice page");
            records.extend(fetched.items);

            if !fetched.has_more {
                break;
            }
            page += 1;
            if page > MAX_PAGES {
                return Err(Error::Upstream(format!(
                    "invoice listing exceeded {MAX_PAGES} pages"
                )));
            }
        }

        Ok(records)
    }
}

/// Build the denormalized cache row for one fetched record.
fn build_snapshot(
    record: &ErpInvoice,
    catalog: &StatusCatalog,
    today: NaiveDate,
    now: &str,
) -> CachedInvoice {
    let payment_entry = catalog.payment_status(record.payment_status);

    CachedInvoice {
        order_id: record.order_id,
        order_ref: record.order_ref.clone(),
        invoice_number: record.invoice_number.clone(),
        order_date: record.order_date,
        tax_date: record.tax_date,
        total_amount: record.total_amount,
        paid_amount: record.paid_amount,
        outstanding: record.outstanding(),
        payment_status: record.payment_status,
        order_status: record.order_status,
        shipping_status: record.shipping_status,
        stock_status: record.stock_status,
        status_label: Some(payment_entry.label.to_string()),
        status_color: Some(payment_entry.color.to_string()),
        billing_name: record.billing_name.clone(),
        billing_email: record.billing_email.clone(),
        billing_company: record.billing_company.clone(),
        billing_contact_id: record.billing_contact_id,
        delivery_name: record.delivery_name.clone(),
        delivery_email: record.delivery_email.clone(),
        days_outstanding: record.days_outstanding(today),
        note_count: 0,
        has_payment_link: false,
        notes_synced_at: None,
        last_updated: now.to_string(),
    }
}
