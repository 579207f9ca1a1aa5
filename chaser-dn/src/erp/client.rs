//! ERP HTTP client
//!
//! Implements [`ErpClient`] against the ERP's JSON API. All calls pass
//! through a request-rate quota; callers layer the shared retry policy on
//! top for transient failures.

use super::types::{DateRange, ErpContact, ErpInvoice, ErpNote, Page};
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::{header, Client, StatusCode};
use std::num::NonZeroU32;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default timeout for ERP API requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default invoice listing page size
const DEFAULT_PAGE_SIZE: u32 = 100;

/// Default request quota against the ERP API
const DEFAULT_RATE_LIMIT_PER_SEC: u32 = 2;

/// ERP client errors
#[derive(Debug, Error)]
pub enum ErpError {
    /// Network communication error (timeout, connection refused)
    #[error("Network error: {0}")]
    Network(String),

    /// ERP API returned an error response
    #[error("API error {0}: {1}")]
    Api(u16, String),

    /// Failed to parse API response JSON
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client was built without the required configuration
    #[error("ERP adapter not configured: {0}")]
    NotConfigured(String),
}

impl ErpError {
    /// Whether a call failing with this error is worth retrying.
    /// Rate-limit pushback and server-side errors are transient;
    /// parse failures and 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ErpError::Network(_) => true,
            ErpError::Api(status, _) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Read-only ERP access used by the synchronizer and the enrichment
/// sub-flows. Implemented by [`HttpErpClient`] in production and by
/// in-memory fakes in tests.
#[async_trait]
pub trait ErpClient: Send + Sync {
    /// List currently open invoices in the date range, one page at a time
    async fn list_open_invoices(
        &self,
        range: &DateRange,
        page: u32,
    ) -> Result<Page<ErpInvoice>, ErpError>;

    /// Fetch all notes attached to an order
    async fn get_notes(&self, order_id: i64) -> Result<Vec<ErpNote>, ErpError>;

    /// Resolve a contact by numeric id; `None` when the id is unknown
    async fn get_contact(&self, contact_id: i64) -> Result<Option<ErpContact>, ErpError>;

    /// Resolve a contact by email address; `None` when no match exists
    async fn find_contact_by_email(&self, email: &str) -> Result<Option<ErpContact>, ErpError>;
}

type DirectRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// HTTP implementation of [`ErpClient`]
pub struct HttpErpClient {
    http_client: Client,
    base_url: String,
    page_size: u32,
    rate_limiter: DirectRateLimiter,
}

impl HttpErpClient {
    /// Build a client from endpoint configuration.
    ///
    /// Errors when the base URL or API key is missing; the caller decides
    /// whether that blocks startup or just the next run.
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<&str>,
        page_size: Option<u32>,
        rate_limit_per_sec: Option<u32>,
    ) -> Result<Self, ErpError> {
        let base_url = base_url
            .ok_or_else(|| ErpError::NotConfigured("missing erp.base_url".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_key = api_key
            .ok_or_else(|| ErpError::NotConfigured("missing erp.api_key".to_string()))?;

        let mut headers = header::HeaderMap::new();
        let mut key_value = header::HeaderValue::from_str(api_key)
            .map_err(|e| ErpError::NotConfigured(format!("invalid erp.api_key: {}", e)))?;
        key_value.set_sensitive(true);
        headers.insert("X-Api-Key", key_value);

        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| ErpError::Network(e.to_string()))?;

        let quota = rate_limit_per_sec
            .and_then(NonZeroU32::new)
            .or(NonZeroU32::new(DEFAULT_RATE_LIMIT_PER_SEC))
            .expect("default rate limit is non-zero");

        Ok(Self {
            http_client,
            base_url,
            page_size: page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            rate_limiter: RateLimiter::direct(Quota::per_second(quota)),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, ErpError> {
        self.rate_limiter.until_ready().await;

        debug!(url = %url, "ERP API request");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ErpError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErpError::Api(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ErpError::Parse(e.to_string()))
    }

    /// Like [`get_json`], but a 404 maps to `Ok(None)`
    async fn get_json_optional<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ErpError> {
        self.rate_limiter.until_ready().await;

        debug!(url = %url, "ERP API request");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| ErpError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErpError::Api(status.as_u16(), body));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| ErpError::Parse(e.to_string()))
    }
}

#[async_trait]
impl ErpClient for HttpErpClient {
    async fn list_open_invoices(
        &self,
        range: &DateRange,
        page: u32,
    ) -> Result<Page<ErpInvoice>, ErpError> {
        let url = format!(
            "{}/invoices/open?from={}&to={}&page={}&page_size={}",
            self.base_url, range.from, range.to, page, self.page_size
        );
        self.get_json(&url).await
    }

    async fn get_notes(&self, order_id: i64) -> Result<Vec<ErpNote>, ErpError> {
        let url = format!("{}/orders/{}/notes", self.base_url, order_id);
        self.get_json(&url).await
    }

    async fn get_contact(&self, contact_id: i64) -> Result<Option<ErpContact>, ErpError> {
        let url = format!("{}/contacts/{}", self.base_url, contact_id);
        self.get_json_optional(&url).await
    }

    async fn find_contact_by_email(&self, email: &str) -> Result<Option<ErpContact>, ErpError> {
        let url = format!(
            "{}/contacts/search?email={}",
            self.base_url,
            urlencode(email)
        );
        let matches: Vec<ErpContact> = self.get_json(&url).await?;
        Ok(matches.into_iter().next())
    }
}

/// Minimal percent-encoding for email query values
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
