//! Notes enrichment sub-flow
//!
//! Refreshes cached order notes and resolves their numeric contact/author
//! identifiers to display names. Only orders whose cached notes are
//! absent or older than the staleness window are touched; within the
//! flow, requests are paced (fixed per-request delay, small batches with
//! an inter-batch pause) and a failing order is given up on without
//! aborting the rest.

use crate::config::RunConfiguration;
use crate::db::{invoices, notes};
use crate::erp::{ErpClient, ErpContact, ErpError};
use chaser_common::{Result, RetryPolicy};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Notes enrichment outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct NotesEnrichmentStats {
    /// Orders whose notes were refreshed
    pub orders_refreshed: u64,
    /// Raw notes written to the cache
    pub notes_cached: u64,
    /// Contact/author display resolutions performed
    pub contacts_resolved: u64,
    /// Orders given up on after retries
    pub orders_failed: u64,
}

/// Notes enrichment service
pub struct NotesEnricher {
    db: SqlitePool,
    erp: Arc<dyn ErpClient>,
    retry: RetryPolicy,
}

impl NotesEnricher {
    pub fn new(db: SqlitePool, erp: Arc<dyn ErpClient>) -> Self {
        Self {
            db,
            erp,
            retry: RetryPolicy::default(),
        }
    }

    /// Refresh notes for every order outside the staleness window.
    pub async fn enrich(&self, config: &RunConfiguration) -> Result<NotesEnrichmentStats> {
        let cutoff =
            (Utc::now() - chrono::Duration::hours(config.notes_staleness_hours)).to_rfc3339();
        let stale_orders = invoices::list_notes_stale(&self.db, &cutoff).await?;

        tracing::debug!(
            stale_orders = stale_orders.len(),
            staleness_hours = config.notes_staleness_hours,
            "Notes enrichment starting"
        );

        let mut stats = NotesEnrichmentStats::default();
        // Contacts already resolved in this run are not looked up again
        let mut contact_cache: HashMap<i64, Option<ErpContact>> = HashMap::new();

        for batch in stale_orders.chunks(config.enrich_batch_size.max(1)) {
            for &order_id in batch {
                if config.enrich_request_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(config.enrich_request_delay_ms)).await;
                }

                match self
                    .refresh_order(order_id, &mut contact_cache, config)
                    .await
                {
                    Ok((note_count, resolved)) => {
                        stats.orders_refreshed += 1;
                        stats.notes_cached += note_count;
                        stats.contacts_resolved += resolved;
                    }
                    Err(e) => {
                        // Give up on this order only
                        tracing::error!(
                            order_id,
                            error = %e,
                            "Notes enrichment failed for order, continuing"
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
            orders_refreshed = stats.orders_refreshed,
            notes_cached = stats.notes_cached,
            contacts_resolved = stats.contacts_resolved,
            orders_failed = stats.orders_failed,
            "Notes enrichment complete"
        );

        Ok(stats)
    }

    /// Fetch and cache the notes of one order, then resolve any missing
    /// contact/author display fields.
    async fn refresh_order(
        &self,
        order_id: i64,
        contact_cache: &mut HashMap<i64, Option<ErpContact>>,
        config: &RunConfiguration,
    ) -> Result<(u64, u64)> {
        let fetched = self
            .retry
            .run("erp get_notes", |e: &ErpError| e.is_transient(), || {
                self.erp.get_notes(order_id)
            })
            .await
            .map_err(|e| chaser_common::Error::Upstream(e.to_string()))?;

        for note in &fetched {
            notes::upsert_raw_note(
                &self.db,
                order_id,
                note.note_id,
                note.text.as_deref(),
                note.contact_id,
                note.author_id,
            )
            .await?;
        }

        let mut resolved = 0u64;
        for note in notes::list_unresolved_for_order(&self.db, order_id).await? {
            if let (Some(contact_id), None) = (note.contact_id, note.contact_name.as_deref()) {
                if let Some(contact) = self.lookup_contact(contact_id, contact_cache, config).await?
                {
                    notes::set_resolved_contact(
                        &self.db,
                        order_id,
                        note.note_id,
                        contact.name.as_deref(),
                        contact.email.as_deref(),
                        contact.company.as_deref(),
                    )
                    .await?;
                    resolved += 1;
                }
            }

            if let (Some(author_id), None) = (note.author_id, note.author_name.as_deref()) {
                if let Some(author) = self.lookup_contact(author_id, contact_cache, config).await? {
                    notes::set_resolved_author(
                        &self.db,
                        order_id,
                        note.note_id,
                        author.name.as_deref(),
                        author.email.as_deref(),
                        author.company.as_deref(),
                    )
                    .await?;
                    resolved += 1;
                }
            }
        }

        let synced_at = Utc::now().to_rfc3339();
        invoices::mark_notes_synced(&self.db, order_id, fetched.len() as i64, &synced_at).await?;

        Ok((fetched.len() as u64, resolved))
    }

    async fn lookup_contact(
        &self,
        contact_id: i64,
        contact_cache: &mut HashMap<i64, Option<ErpContact>>,
        config: &RunConfiguration,
    ) -> Result<Option<ErpContact>> {
        if let Some(cached) = contact_cache.get(&contact_id) {
            return Ok(cached.clone());
        }

        if config.enrich_request_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.enrich_request_delay_ms)).await;
        }

        let contact = self
            .retry
            .run("erp get_contact", |e: &ErpError| e.is_transient(), || {
                self.erp.get_contact(contact_id)
            })
            .await
            .map_err(|e| chaser_common::Error::Upstream(e.to_string()))?;

        if contact.is_none() {
            tracing::debug!(contact_id, "Contact id did not resolve");
        }

        contact_cache.insert(contact_id, contact.clone());
        Ok(contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::invoices::CachedInvoice;
    use crate::erp::{DateRange, ErpError, ErpInvoice, ErpNote, Page};
    use async_trait::async_trait;
    use chaser_common::db::init_memory_pool;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct MockErp {
        notes: HashMap<i64, Vec<ErpNote>>,
        contacts: HashMap<i64, ErpContact>,
        contact_calls: AtomicU32,
        fail_notes_for: Option<i64>,
    }

    #[async_trait]
    impl ErpClient for MockErp {
        async fn list_open_invoices(
            &self,
            _range: &DateRange,
            _page: u32,
        ) -> std::result::Result<Page<ErpInvoice>, ErpError> {
            Ok(Page {
                items: Vec::new(),
                page: 1,
                has_more: false,
            })
        }

        async fn get_notes(&self, order_id: i64) -> std::result::Result<Vec<ErpNote>, ErpError> {
            if self.fail_notes_for == Some(order_id) {
                return Err(ErpError::Api(404, "no such order".to_string()));
            }
            Ok(self.notes.get(&order_id).cloned().unwrap_or_default())
        }

        async fn get_contact(
            &self,
            contact_id: i64,
        ) -> std::result::Result<Option<ErpContact>, ErpError> {
            self.contact_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.contacts.get(&contact_id).cloned())
        }

        async fn find_contact_by_email(
            &self,
            _email: &str,
        ) -> std::result::Result<Option<ErpContact>, ErpError> {
            Ok(None)
        }
    }

    fn contact(id: i64, name: &str) -> ErpContact {
        ErpContact {
            contact_id: id,
            name: Some(name.to_string()),
            email: Some(format!("{}@example.com", name.to_lowercase())),
            company: None,
        }
    }

    async fn seed_invoice(pool: &SqlitePool, order_id: i64) {
        let invoice = CachedInvoice {
            order_id,
            order_ref: format!("SO-{order_id:04}"),
            invoice_number: None,
            order_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
            tax_date: None,
            total_amount: 100.0,
            paid_amount: 0.0,
            outstanding: 100.0,
            payment_status: 0,
            order_status: 1,
            shipping_status: None,
            stock_status: None,
            status_label: None,
            status_color: None,
            billing_name: None,
            billing_email: Some("x@example.com".to_string()),
            billing_company: None,
            billing_contact_id: None,
            delivery_name: None,
            delivery_email: None,
            days_outstanding: 40,
            note_count: 0,
            has_payment_link: false,
            notes_synced_at: None,
            last_updated: "2026-08-08T00:00:00+00:00".to_string(),
        };
        invoices::upsert_invoice(pool, &invoice).await.unwrap();
    }

    #[tokio::test]
    async fn test_enrich_caches_notes_and_resolves_contacts() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 1).await;

        let erp = Arc::new(MockErp {
            notes: HashMap::from([(
                1,
                vec![
                    ErpNote {
                        note_id: 10,
                        text: Some("called customer".to_string()),
                        contact_id: Some(7),
                        author_id: Some(3),
                    },
                    ErpNote {
                        note_id: 11,
                        text: None,
                        contact_id: Some(7),
                        author_id: None,
                    },
                ],
            )]),
            contacts: HashMap::from([(7, contact(7, "Ada")), (3, contact(3, "Bob"))]),
            contact_calls: AtomicU32::new(0),
            fail_notes_for: None,
        });

        let enricher = NotesEnricher::new(pool.clone(), erp.clone());
        let stats = enricher
            .enrich(&RunConfiguration::for_tests(false))
            .await
            .unwrap();

        assert_eq!(stats.orders_refreshed, 1);
        assert_eq!(stats.notes_cached, 2);
        assert_eq!(stats.contacts_resolved, 3);
        assert_eq!(stats.orders_failed, 0);

        let cached = notes::list_for_order(&pool, 1).await.unwrap();
        assert_eq!(cached.len(), 2);
        assert_eq!(cached[0].contact_name.as_deref(), Some("Ada"));
        assert_eq!(cached[0].author_name.as_deref(), Some("Bob"));
        assert_eq!(cached[1].contact_name.as_deref(), Some("Ada"));

        // Contact 7 appears twice but is fetched once (per-run cache)
        assert_eq!(erp.contact_calls.load(Ordering::SeqCst), 2);

        let invoice = invoices::get(&pool, 1).await.unwrap().unwrap();
        assert_eq!(invoice.note_count, 2);
        assert!(invoice.notes_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_fresh_orders_are_skipped() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 1).await;

        // Mark the order as just refreshed
        invoices::mark_notes_synced(&pool, 1, 0, &Utc::now().to_rfc3339())
            .await
            .unwrap();

        let erp = Arc::new(MockErp {
            notes: HashMap::new(),
            contacts: HashMap::new(),
            contact_calls: AtomicU32::new(0),
            fail_notes_for: None,
        });
        let enricher = NotesEnricher::new(pool.clone(), erp);
        let stats = enricher
            .enrich(&RunConfiguration::for_tests(false))
            .await
            .unwrap();

        assert_eq!(stats.orders_refreshed, 0);
    }

    #[tokio::test]
    async fn test_failed_order_does_not_abort_flow() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 1).await;
        seed_invoice(&pool, 2).await;

        let erp = Arc::new(MockErp {
            notes: HashMap::from([(
                2,
                vec![ErpNote {
                    note_id: 20,
                    text: Some("ok".to_string()),
                    contact_id: None,
                    author_id: None,
                }],
            )]),
            contacts: HashMap::new(),
            contact_calls: AtomicU32::new(0),
            fail_notes_for: Some(1),
        });

        let enricher = NotesEnricher::new(pool.clone(), erp);
        let stats = enricher
            .enrich(&RunConfiguration::for_tests(false))
            .await
            .unwrap();

        assert_eq!(stats.orders_failed, 1);
        assert_eq!(stats.orders_refreshed, 1);
        assert_eq!(notes::list_for_order(&pool, 2).await.unwrap().len(), 1);
        // The failed order stays stale and will be retried next run
        let failed = invoices::get(&pool, 1).await.unwrap().unwrap();
        assert!(failed.notes_synced_at.is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_contact_left_null() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 1).await;

        let erp = Arc::new(MockErp {
            notes: HashMap::from([(
                1,
                vec![ErpNote {
                    note_id: 10,
                    text: None,
                    contact_id: Some(99),
                    author_id: None,
                }],
            )]),
            contacts: HashMap::new(),
            contact_calls: AtomicU32::new(0),
            fail_notes_for: None,
        });

        let enricher = NotesEnricher::new(pool.clone(), erp);
        let stats = enricher
            .enrich(&RunConfiguration::for_tests(false))
            .await
            .unwrap();

        assert_eq!(stats.contacts_resolved, 0);
        let cached = notes::list_for_order(&pool, 1).await.unwrap();
        assert!(cached[0].contact_name.is_none());
    }
}
