//! Send pipeline
//!
//! Processes due schedule rows: re-validates each recipient through the
//! safety governor, renders the campaign templates, requests the invoice
//! PDF (non-fatal on failure), and hands the message to the mail
//! collaborator. Outcomes land on the schedule row; there is no retry
//! beyond the attempt ceiling enforced by the due-row query.

use crate::config::RunConfiguration;
use crate::db::campaigns::{self, Campaign};
use crate::db::preferences::OptOutScope;
use crate::db::schedules::{self, Schedule, SkipReason};
use crate::db::{invoices, payment_links};
use crate::services::mail_client::{EmailAttachment, Mailer, OutboundEmail};
use crate::services::pdf_client::PdfRenderer;
use crate::services::{safety, template};
use chaser_common::Result;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Send pass outcome
#[derive(Debug, Clone, Copy, Default)]
pub struct SendStats {
    pub sent: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Send pipeline service
pub struct SendPipeline {
    db: SqlitePool,
    mailer: Arc<dyn Mailer>,
    pdf: Option<Arc<dyn PdfRenderer>>,
}

impl SendPipeline {
    pub fn new(db: SqlitePool, mailer: Arc<dyn Mailer>, pdf: Option<Arc<dyn PdfRenderer>>) -> Self {
        Self { db, mailer, pdf }
    }

    /// Process every row due today across all campaigns.
    pub async fn process_due(
        &self,
        config: &RunConfiguration,
        run_started_at: DateTime<Utc>,
    ) -> Result<SendStats> {
        let today = Utc::now().date_naive();
        let due = schedules::due_rows(&self.db, today, config.test_mode).await?;

        let campaign_map: HashMap<i64, Campaign> = campaigns::list_all(&self.db)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        tracing::info!(due = due.len(), test_mode = config.test_mode, "Send pass starting");

        let mut stats = SendStats::default();

        for row in due {
            match self
                .process_row(&row, &campaign_map, config, run_started_at)
                .await
            {
                Ok(RowOutcome::Sent) => stats.sent += 1,
                Ok(RowOutcome::Failed) => stats.failed += 1,
                Ok(RowOutcome::Skipped) => stats.skipped += 1,
                Err(e) => {
                    // Store-level failure on this row only
                    tracing::error!(
                        schedule_id = row.id,
                        error = %e,
                        "Send processing failed for schedule row, continuing"
                    );
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            sent = stats.sent,
            failed = stats.failed,
            skipped = stats.skipped,
            "Send pass complete"
        );

        Ok(stats)
    }

    async fn process_row(
        &self,
        row: &Schedule,
        campaign_map: &HashMap<i64, Campaign>,
        config: &RunConfiguration,
        run_started_at: DateTime<Utc>,
    ) -> Result<RowOutcome> {
        schedules::begin_attempt(&self.db, row.id, &Utc::now().to_rfc3339()).await?;

        let Some(campaign) = campaign_map.get(&row.campaign_id) else {
            schedules::mark_failed(&self.db, row.id, "campaign no longer exists").await?;
            return Ok(RowOutcome::Failed);
        };
        let Some(kind) = campaign.campaign_kind() else {
            schedules::mark_failed(&self.db, row.id, "campaign kind unknown").await?;
            return Ok(RowOutcome::Failed);
        };

        let scope = if kind.is_reminder() {
            OptOutScope::Reminders
        } else {
            OptOutScope::Collections
        };

        if let Some(reason) = safety::send_time_check(
            &self.db,
            config,
            &row.recipient_email,
            row.order_id,
            scope,
            run_started_at,
        )
        .await?
        {
            tracing::info!(
                schedule_id = row.id,
                order_id = row.order_id,
                reason = reason.as_str(),
                "Send suppressed by safety check"
            );
            schedules::mark_skipped(&self.db, row.id, reason).await?;
            return Ok(RowOutcome::Skipped);
        }

        // The safety check passed, so the invoice is present with a
        // positive balance; a disappearance between the two reads still
        // resolves to a paid-invoice skip.
        let Some(invoice) = invoices::get(&self.db, row.order_id).await? else {
            schedules::mark_skipped(&self.db, row.id, SkipReason::InvoicePaid).await?;
            return Ok(RowOutcome::Skipped);
        };

        let vars = self.build_vars(&invoice, &row.recipient_email, config).await?;
        let subject = template::render(&campaign.subject_template, &vars);
        let body = template::render(&campaign.body_template, &vars);

        // Attachment failure is non-fatal: the notification still goes out
        let attachment = match &self.pdf {
            Some(pdf) => match pdf.render_invoice(&invoice).await {
                Ok(bytes) => Some(EmailAttachment {
                    filename: format!(
                        "{}.pdf",
                        invoice.invoice_number.as_deref().unwrap_or(&invoice.order_ref)
                    ),
                    content: bytes,
                }),
                Err(e) => {
                    tracing::warn!(
                        order_id = invoice.order_id,
                        error = %e,
                        "PDF rendering failed, sending without attachment"
                    );
                    None
                }
            },
            None => None,
        };

        let email = OutboundEmail {
            from_name: config.sender_name.clone(),
            from_email: config.sender_email.clone().unwrap_or_default(),
            to: row.recipient_email.clone(),
            subject,
            body,
            attachment,
        };

        match self.mailer.send(&email).await {
            Ok(message_id) => {
                schedules::mark_sent(&self.db, row.id, &Utc::now().to_rfc3339(), &message_id)
                    .await?;
                tracing::info!(
                    schedule_id = row.id,
                    order_id = row.order_id,
                    message_id = %message_id,
                    "Notification sent"
                );
                Ok(RowOutcome::Sent)
            }
            Err(e) => {
                schedules::mark_failed(&self.db, row.id, &e.to_string()).await?;
                tracing::error!(
                    schedule_id = row.id,
                    order_id = row.order_id,
                    attempt = row.attempt_count + 1,
                    error = %e,
                    "Notification delivery failed"
                );
                Ok(RowOutcome::Failed)
            }
        }
    }

    async fn build_vars(
        &self,
        invoice: &invoices::CachedInvoice,
        recipient_email: &str,
        config: &RunConfiguration,
    ) -> Result<HashMap<&'static str, String>> {
        let payment_link = payment_links::get(&self.db, invoice.order_id)
            .await?
            .map(|l| l.url)
            .unwrap_or_default();

        let optout_link = template::build_optout_url(
            config.public_base_url.as_deref(),
            recipient_email,
            &config.optout_secret,
        )
        .unwrap_or_default();

        let customer_name = invoice
            .billing_name
            .clone()
            .or_else(|| invoice.billing_company.clone())
            .unwrap_or_else(|| recipient_email.to_string());

        Ok(HashMap::from([
            ("CUSTOMER_NAME", customer_name),
            ("COMPANY_NAME", invoice.billing_company.clone().unwrap_or_default()),
            (
                "INVOICE_NUMBER",
                invoice
                    .invoice_number
                    .clone()
                    .unwrap_or_else(|| invoice.order_ref.clone()),
            ),
            ("ORDER_REF", invoice.order_ref.clone()),
            ("ORDER_ID", invoice.order_id.to_string()),
            ("AMOUNT_TOTAL", template::format_currency(invoice.total_amount)),
            ("AMOUNT_PAID", template::format_currency(invoice.paid_amount)),
            ("AMOUNT_DUE", template::format_currency(invoice.outstanding)),
            ("DAYS_OUTSTANDING", invoice.days_outstanding.to_string()),
            ("ORDER_DATE", invoice.order_date.to_string()),
            (
                "INVOICE_DATE",
                invoice
                    .tax_date
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| invoice.order_date.to_string()),
            ),
            ("PAYMENT_LINK", payment_link),
            ("OPTOUT_LINK", optout_link),
            (
                "SENDER_NAME",
                config.sender_name.clone().unwrap_or_default(),
            ),
        ]))
    }
}

enum RowOutcome {
    Sent,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::invoices::CachedInvoice;
    use crate::db::schedules::dedup_key;
    use crate::services::mail_client::MailError;
    use crate::services::pdf_client::PdfError;
    use async_trait::async_trait;
    use chaser_common::db::init_memory_pool;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct MockMailer {
        sent: Mutex<Vec<OutboundEmail>>,
        fail: bool,
    }

    impl MockMailer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl Mailer for MockMailer {
        async fn send(&self, email: &OutboundEmail) -> std::result::Result<String, MailError> {
            if self.fail {
                return Err(MailError::Api(500, "smtp relay down".to_string()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push(email.clone());
            Ok(format!("msg-{}", sent.len()))
        }
    }

    struct MockPdf {
        fail: bool,
    }

    #[async_trait]
    impl PdfRenderer for MockPdf {
        async fn render_invoice(
            &self,
            _invoice: &CachedInvoice,
        ) -> std::result::Result<Vec<u8>, PdfError> {
            if self.fail {
                return Err(PdfError::Api(500, "renderer down".to_string()));
            }
            Ok(b"%PDF-1.4 fake".to_vec())
        }
    }

    async fn seed_invoice(pool: &SqlitePool, order_id: i64, outstanding: f64, days: i64) {
        let invoice = CachedInvoice {
            order_id,
            order_ref: format!("SO-{order_id:04}"),
            invoice_number: Some(format!("INV-{order_id:04}")),
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
            billing_name: Some("Ada Example".to_string()),
            billing_email: Some("ada@example.com".to_string()),
            billing_company: None,
            billing_contact_id: None,
            delivery_name: None,
            delivery_email: None,
            days_outstanding: days,
            note_count: 0,
            has_payment_link: false,
            notes_synced_at: None,
            last_updated: "2026-08-08T00:00:00+00:00".to_string(),
        };
        invoices::upsert_invoice(pool, &invoice).await.unwrap();
    }

    async fn seed_pending(pool: &SqlitePool, campaign_id: i64, order_id: i64) -> i64 {
        let key = dedup_key(campaign_id, order_id, None);
        schedules::insert_pending(
            pool,
            campaign_id,
            order_id,
            "ada@example.com",
            Utc::now().date_naive(),
            false,
            &key,
        )
        .await
        .unwrap();
        schedules::due_rows(pool, Utc::now().date_naive(), false)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.order_id == order_id)
            .unwrap()
            .id
    }

    fn campaign_61_90_id() -> i64 {
        // Seeded campaigns are ordered by trigger day: 30, 60, 90, 91
        2
    }

    #[tokio::test]
    async fn test_successful_send_renders_amount_due() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0, 61).await;
        let id = seed_pending(&pool, campaign_61_90_id(), 500).await;

        let mailer = MockMailer::new();
        let pipeline = SendPipeline::new(
            pool.clone(),
            mailer.clone(),
            Some(Arc::new(MockPdf { fail: false })),
        );
        let stats = pipeline
            .process_due(&RunConfiguration::for_tests(false), Utc::now())
            .await
            .unwrap();

        assert_eq!(stats.sent, 1);
        assert_eq!(stats.failed, 0);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("150.00"));
        assert!(!sent[0].body.contains("{{"));
        assert!(sent[0].attachment.is_some());
        assert_eq!(sent[0].from_email, "billing@example.com");
        drop(sent);

        let row = schedules::list(&pool, Some("sent"), None, 10).await.unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].id, id);
        assert_eq!(row[0].attempt_count, 1);
        assert!(row[0].message_id.is_some());
        assert!(row[0].sent_at.is_some());
    }

    #[tokio::test]
    async fn test_pdf_failure_is_non_fatal() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0, 61).await;
        seed_pending(&pool, campaign_61_90_id(), 500).await;

        let mailer = MockMailer::new();
        let pipeline = SendPipeline::new(
            pool.clone(),
            mailer.clone(),
            Some(Arc::new(MockPdf { fail: true })),
        );
        let stats = pipeline
            .process_due(&RunConfiguration::for_tests(false), Utc::now())
            .await
            .unwrap();

        assert_eq!(stats.sent, 1);
        let sent = mailer.sent.lock().unwrap();
        assert!(sent[0].attachment.is_none());
    }

    #[tokio::test]
    async fn test_delivery_failure_marks_failed() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0, 61).await;
        seed_pending(&pool, campaign_61_90_id(), 500).await;

        let pipeline = SendPipeline::new(pool.clone(), MockMailer::failing(), None);
        let stats = pipeline
            .process_due(&RunConfiguration::for_tests(false), Utc::now())
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        let rows = schedules::list(&pool, Some("failed"), None, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attempt_count, 1);
        assert!(rows[0].error.as_deref().unwrap().contains("smtp relay down"));
    }

    #[tokio::test]
    async fn test_paid_invoice_skipped_at_send_time() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0, 61).await;
        seed_pending(&pool, campaign_61_90_id(), 500).await;

        // The invoice is settled between scheduling and sending
        seed_invoice(&pool, 500, 0.0, 61).await;

        let mailer = MockMailer::new();
        let pipeline = SendPipeline::new(pool.clone(), mailer.clone(), None);
        let stats = pipeline
            .process_due(&RunConfiguration::for_tests(false), Utc::now())
            .await
            .unwrap();

        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.sent, 0);
        assert!(mailer.sent.lock().unwrap().is_empty());

        let rows = schedules::list(&pool, Some("skipped"), None, 10).await.unwrap();
        assert_eq!(rows[0].skip_reason.as_deref(), Some("invoice_paid"));
    }

    #[tokio::test]
    async fn test_opt_out_after_scheduling_suppresses_send() {
        let pool = init_memory_pool().await.unwrap();
        seed_invoice(&pool, 500, 150.0, 61).await;
        seed_pending(&pool, campaign_61_90_id(), 500).await;

        crate::db::preferences::set_opt_out(&pool, "ada@example.com", false, true, false)
            .await
            .unwrap();

        let mailer = MockMailer::new();
        let pipeline = SendPipeline::new(pool.clone(), mailer.clone(), None);
        let stats = pipeline
            .process_due(&RunConfiguration::for_tests(false), Utc::now())
            .await
            .unwrap();

        assert_eq!(stats.skipped, 1);
        assert!(mailer.sent.lock().unwrap().is_empty());

        let rows = schedules::list(&pool, Some("skipped"), None, 10).await.unwrap();
        assert_eq!(rows[0].skip_reason.as_deref(), Some("customer_opted_out"));
    }
}
