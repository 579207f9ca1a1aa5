//! PDF rendering collaborator client
//!
//! Renders an invoice document for attachment to outgoing notifications.
//! Failures here are non-fatal to sending: the pipeline logs a warning
//! and sends without the attachment.

use crate::db::invoices::CachedInvoice;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// PDF collaborator errors
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("PDF renderer not configured: {0}")]
    NotConfigured(String),
}

/// Renders an invoice snapshot to document bytes
#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render_invoice(&self, invoice: &CachedInvoice) -> Result<Vec<u8>, PdfError>;
}

/// HTTP implementation of [`PdfRenderer`]
pub struct HttpPdfRenderer {
    http_client: Client,
    base_url: String,
}

impl HttpPdfRenderer {
    pub fn new(base_url: Option<&str>) -> Result<Self, PdfError> {
        let base_url = base_url
            .ok_or_else(|| PdfError::NotConfigured("missing pdf.base_url".to_string()))?
            .trim_end_matches('/')
            .to_string();

        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| PdfError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl PdfRenderer for HttpPdfRenderer {
    async fn render_invoice(&self, invoice: &CachedInvoice) -> Result<Vec<u8>, PdfError> {
        let url = format!("{}/render/invoice", self.base_url);

        debug!(order_id = invoice.order_id, url = %url, "Requesting invoice PDF");

        let snapshot = json!({
            "order_id": invoice.order_id,
            "order_ref": invoice.order_ref,
            "invoice_number": invoice.invoice_number,
            "order_date": invoice.order_date,
            "tax_date": invoice.tax_date,
            "total_amount": invoice.total_amount,
            "paid_amount": invoice.paid_amount,
            "outstanding": invoice.outstanding,
            "billing_name": invoice.billing_name,
            "billing_company": invoice.billing_company,
        });

        let response = self
            .http_client
            .post(&url)
            .json(&snapshot)
            .send()
            .await
            .map_err(|e| PdfError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PdfError::Api(status.as_u16(), body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PdfError::Network(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
