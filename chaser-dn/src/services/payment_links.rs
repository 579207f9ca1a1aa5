//! Payment link construction sub-flow
//!
//! Builds a deterministic payment URL for every cached order that does
//! not have one yet. Once written a link is never regenerated, so the
//! whole pass is idempotent and safe to re-run.
//!
//! The billing contact id stored on the order may be stale. When a
//! billing email is present, a lookup-by-email is preferred over the
//! stored id; the substitution is logged and the stored id remains the
//! fallback when no match is found.

use crate::config::RunConfiguration;
use crate::db::{invoices, payment_links};
use crate::erp::{ErpClient, ErpError};
use chaser_common::{Result, RetryPolicy};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

/// Payment link pass outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct PaymentLinkStats {
    pub links_created: u64,
    /// Orders where the email lookup overrode the stored contact id
    pub contacts_substituted: u64,
    pub orders_failed: u64,
}

/// Payment link builder service
pub struct PaymentLinkBuilder {
    db: SqlitePool,
    erp: Arc<dyn ErpClient>,
    retry: RetryPolicy,
}

impl PaymentLinkBuilder {
    pub fn new(db: SqlitePool, erp: Arc<dyn ErpClient>) -> Self {
        Self {
            db,
            erp,
            retry: RetryPolicy::default(),
        }
    }

    /// Construct links for all orders that lack one.
    pub async fn build_missing(&self, config: &RunConfiguration) -> Result<PaymentLinkStats> {
        let Some(template) = config.payment_link_template.as_deref() else {
            tracing::warn!("No payment_link_template configured, skipping payment link pass");
            return Ok(PaymentLinkStats::default());
        };

        let order_ids = invoices::list_missing_payment_link(&self.db).await?;
        tracing::debug!(missing = order_ids.len(), "Payment link pass starting");

        let mut stats = PaymentLinkStats::default();

        for batch in order_ids.chunks(config.enrich_batch_size.max(1)) {
            for &order_id in batch {
                match self.build_for_order(order_id, template, &mut stats, config).await {
                    Ok(()) => {}
                    Err(e) => {
                        tracing::error!(
                            order_id,
                            error = %e,
                            "Payment link construction failed for order, continuing"
                        );
                        stats.orders_failed += 1;
                    }
                }
            }

            if config.enrich_batch_pause_ms > 0 {
                tokio::time::sleep(Duration::from_millis(config.enrich_batch_pause_ms)).await;
            }
        }

        tracing::info!(
            links_created = stats.links_created,
            contacts_substituted = stats.contacts_substituted,
            orders_failed = stats.orders_failed,
            "Payment link pass complete"
        );

        Ok(stats)
    }

    async fn build_for_order(
        &self,
        order_id: i64,
        template: &str,
        stats: &mut PaymentLinkStats,
        config: &RunConfiguration,
    ) -> Result<()> {
        let Some(invoice) = invoices::get(&self.db, order_id).await? else {
            return Ok(());
        };

        let contact_id = self.resolve_billing_contact(&invoice, stats, config).await?;

        let invoice_ref = invoice
            .invoice_number
            .clone()
            .unwrap_or_else(|| invoice.order_ref.clone());
        let url = template
            .replace("{invoice_ref}", &invoice_ref)
            .replace(
                "{contact_id}",
                &contact_id.map(|id| id.to_string()).unwrap_or_default(),
            )
            .replace("{order_id}", &order_id.to_string());

        if payment_links::insert_if_absent(&self.db, order_id, &url, contact_id).await? {
            invoices::mark_has_payment_link(&self.db, order_id).await?;
            stats.links_created += 1;
            tracing::debug!(order_id, url = %url, "Payment link created");
        }

        Ok(())
    }

    /// The contact id used to build the link: email lookup first, the
    /// order's stored id as fallback.
    async fn resolve_billing_contact(
        &self,
        invoice: &invoices::CachedInvoice,
        stats: &mut PaymentLinkStats,
        config: &RunConfiguration,
    ) -> Result<Option<i64>> {
        let stored = invoice.billing_contact_id;

        let Some(email) = invoice.billing_email.as_deref().filter(|e| !e.is_empty()) else {
            return Ok(stored);
        };

        if config.enrich_request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.enrich_request_delay_ms)).await;
        }

        let looked_up = self
            .retry
            .run("erp find_contact_by_email", |e: &ErpError| e.is_transient(), || {
                self.erp.find_contact_by_email(email)
            })
            .await
            .map_err(|e| chaser_common::Error::Upstream(e.to_string()))?;

        match looked_up {
            Some(contact) => {
                if stored.is_some() && stored != Some(contact.contact_id) {
                    tracing::warn!(
                        order_id = invoice.order_id,
                        stored_contact_id = stored,
                        resolved_contact_id = contact.contact_id,
                        "Stored billing contact id disagrees with email lookup, using lookup"
                    );
                    stats.contacts_substituted += 1;
                }
                Ok(Some(contact.contact_id))
            }
            None => Ok(stored),
        }
    }
}
