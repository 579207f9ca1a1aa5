//! ERP source adapter
//!
//! Read-only access to order, invoice, payment and note records in the
//! external ERP. The ERP API is slow and rate-limited, so every consumer
//! goes through the shared client here: paged listing, a per-client
//! request-rate quota, and transient-error classification feeding the
//! common retry policy.

pub mod client;
pub mod types;

pub use client::{ErpClient, ErpError, HttpErpClient};
pub use types::{DateRange, ErpContact, ErpInvoice, ErpNote, Page};
