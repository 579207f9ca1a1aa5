//! Transactional email collaborator client

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Mail collaborator errors
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Mailer not configured: {0}")]
    NotConfigured(String),
}

impl MailError {
    pub fn is_transient(&self) -> bool {
        match self {
            MailError::Network(_) => true,
            MailError::Api(status, _) => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Attachment carried on an outbound message
#[derive(Debug, Clone)]
pub struct EmailAttachment {
    pub filename: String,
    pub content: Vec<u8>,
}

/// One outbound message
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub from_name: Option<String>,
    pub from_email: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<EmailAttachment>,
}

/// Sends transactional email; returns the provider message reference
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<String, MailError>;
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    message_id: String,
}

/// HTTP implementation of [`Mailer`] against the transactional mail API
pub struct HttpMailer {
    http_client: Client,
    base_url: String,
}

impl HttpMailer {
    pub fn new(base_url: Option<&str>, api_key: Option<&str>) -> Result<Self, MailError> {
        let base_url = base_url
            .ok_or_else(|| MailError::NotConfigured("missing mail.base_url".to_string()))?
            .trim_end_matches('/')
            .to_string();
        let api_key = api_key
            .ok_or_else(|| MailError::NotConfigured("missing mail.api_key".to_string()))?;

        let mut headers = header::HeaderMap::new();
        let mut auth = header::HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|e| MailError::NotConfigured(format!("invalid mail.api_key: {}", e)))?;
        auth.set_sensitive(true);
        headers.insert(header::AUTHORIZATION, auth);

        let http_client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| MailError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<String, MailError> {
        let url = format!("{}/messages", self.base_url);

        debug!(to = %email.to, subject = %email.subject, "Sending transactional email");

        let attachments = email.attachment.as_ref().map(|a| {
            vec![json!({
                "filename": a.filename,
                "content": base64::engine::general_purpose::STANDARD.encode(&a.content),
            })]
        });

        let payload = json!({
            "from": {
                "name": email.from_name,
                "email": email.from_email,
            },
            "to": email.to,
            "subject": email.subject,
            "text_body": email.body,
            "attachments": attachments,
        });

        let response = self
            .http_client
            .post(&url)
            .header("Idempotency-Key", Uuid::new_v4().to_string())
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::Api(status.as_u16(), body));
        }

        let parsed: SendResponse = response
            .json()
            .await
            .map_err(|e| MailError::Parse(e.to_string()))?;

        Ok(parsed.message_id)
    }
}
