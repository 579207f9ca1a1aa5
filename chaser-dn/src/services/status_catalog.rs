//! Status code to display name/color mapping
//!
//! An immutable catalog injected into the synchronizer and rebuilt once
//! per sync cycle. Lookups fall back to a neutral entry for codes the
//! catalog does not know, so unexpected upstream values never break a
//! sync.

use std::collections::HashMap;

/// Display name and color for one status code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub label: &'static str,
    pub color: &'static str,
}

/// Immutable status lookup tables for one sync cycle
#[derive(Debug, Clone)]
pub struct StatusCatalog {
    payment: HashMap<i64, StatusEntry>,
    order: HashMap<i64, StatusEntry>,
    shipping: HashMap<i64, StatusEntry>,
    stock: HashMap<i64, StatusEntry>,
}

const UNKNOWN: StatusEntry = StatusEntry {
    label: "Unknown",
    color: "#777777",
};

impl StatusCatalog {
    /// The standard catalog for the ERP's status code space
    pub fn standard() -> Self {
        let payment = HashMap::from([
            (0, StatusEntry { label: "Unpaid", color: "#d9534f" }),
            (1, StatusEntry { label: "Partially paid", color: "#f0ad4e" }),
            (2, StatusEntry { label: "Paid", color: "#5cb85c" }),
        ]);

        let order = HashMap::from([
            (0, StatusEntry { label: "Draft", color: "#999999" }),
            (1, StatusEntry { label: "Confirmed", color: "#5bc0de" }),
            (2, StatusEntry { label: "In progress", color: "#428bca" }),
            (3, StatusEntry { label: "Delivered", color: "#5cb85c" }),
            (4, StatusEntry { label: "Cancelled", color: "#d9534f" }),
        ]);

        let shipping = HashMap::from([
            (0, StatusEntry { label: "Not shipped", color: "#999999" }),
            (1, StatusEntry { label: "Partially shipped", color: "#f0ad4e" }),
            (2, StatusEntry { label: "Shipped", color: "#5cb85c" }),
        ]);

        let stock = HashMap::from([
            (0, StatusEntry { label: "Out of stock", color: "#d9534f" }),
            (1, StatusEntry { label: "Partially available", color: "#f0ad4e" }),
            (2, StatusEntry { label: "In stock", color: "#5cb85c" }),
        ]);

        Self {
            payment,
            order,
            shipping,
            stock,
        }
    }

    pub fn payment_status(&self, code: i64) -> &StatusEntry {
        self.payment.get(&code).unwrap_or(&UNKNOWN)
    }

    pub fn order_status(&self, code: i64) -> &StatusEntry {
        self.order.get(&code).unwrap_or(&UNKNOWN)
    }

    pub fn shipping_status(&self, code: i64) -> &StatusEntry {
        self.shipping.get(&code).unwrap_or(&UNKNOWN)
    }

    pub fn stock_status(&self, code: i64) -> &StatusEntry {
        self.stock.get(&code).unwrap_or(&UNKNOWN)
    }
}
