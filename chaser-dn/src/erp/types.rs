//! ERP record types as returned by the source API

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Closed date range for invoice listing
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// One page of a listing call
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub has_more: bool,
}

/// Open invoice record as fetched from the ERP.
///
/// Monetary amounts arrive as decimal numbers; the cache stores them
/// as-is and formats to two decimals only at render time.
#[derive(Debug, Clone, Deserialize)]
pub struct ErpInvoice {
    pub order_id: i64,
    pub order_ref: String,
    pub invoice_number: Option<String>,
    pub order_date: NaiveDate,
    /// Invoice/tax date; the aging basis when present
    pub tax_date: Option<NaiveDate>,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub payment_status: i64,
    pub order_status: i64,
    pub shipping_status: Option<i64>,
    pub stock_status: Option<i64>,
    pub billing_name: Option<String>,
    pub billing_email: Option<String>,
    pub billing_company: Option<String>,
    pub billing_contact_id: Option<i64>,
    pub delivery_name: Option<String>,
    pub delivery_email: Option<String>,
}

impl ErpInvoice {
    /// Outstanding balance, never negative
    pub fn outstanding(&self) -> f64 {
        (self.total_amount - self.paid_amount).max(0.0)
    }

    /// The date days-outstanding is computed from: the tax/invoice date
    /// when present, the order date otherwise.
    pub fn aging_basis(&self) -> NaiveDate {
        self.tax_date.unwrap_or(self.order_date)
    }

    /// Whole days between the aging basis and `today`. Recomputed at every
    /// sync rather than trusted from a prior cache read.
    pub fn days_outstanding(&self, today: NaiveDate) -> i64 {
        (today - self.aging_basis()).num_days()
    }
}

/// Raw order note as fetched from the ERP. Contact and author arrive as
/// numeric identifiers only; display fields are resolved by enrichment.
#[derive(Debug, Clone, Deserialize)]
pub struct ErpNote {
    pub note_id: i64,
    pub text: Option<String>,
    pub contact_id: Option<i64>,
    pub author_id: Option<i64>,
}

/// Resolved contact record
#[derive(Debug, Clone, Deserialize)]
pub struct ErpContact {
    pub contact_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
}
