//! Template rendering for outbound messages
//!
//! Both `{VAR}` and `{{VAR}}` placeholder spellings are accepted because
//! operator-edited templates have historically used either. The
//! double-delimited form is replaced first so the single-delimited pass
//! cannot corrupt it.

use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Substitute all placeholders in `template` from `vars`.
/// Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &HashMap<&'static str, String>) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Fixed two-decimal currency formatting
pub fn format_currency(amount: f64) -> String {
    format!("{:.2}", amount)
}

/// Recipient-scoped opt-out token: SHA-256 over the lower-cased address
/// and the service secret.
pub fn optout_token(email: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.to_lowercase().as_bytes());
    hasher.update(b":");
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Check a presented opt-out token against the expected one
pub fn verify_optout_token(email: &str, secret: &str, token: &str) -> bool {
    !secret.is_empty() && optout_token(email, secret) == token
}

/// Build the recipient-scoped opt-out URL, or `None` when the service has
/// no public base URL or secret configured.
pub fn build_optout_url(
    public_base_url: Option<&str>,
    email: &str,
    secret: &str,
) -> Option<String> {
    let base = public_base_url?.trim_end_matches('/');
    if secret.is_empty() {
        return None;
    }
    let token = optout_token(email, secret);
    Some(format!(
        "{}/optout?email={}&token={}",
        base,
        urlencode_email(email),
        token
    ))
}

fn urlencode_email(email: &str) -> String {
    email
        .to_lowercase()
        .replace('%', "%25")
        .replace('@', "%40")
        .replace('+', "%2B")
}
