//! Database access for chaser-dn
//!
//! One module per table, mirroring the schema created by
//! `chaser_common::db::migrations`. All queries are plain runtime sqlx
//! against the shared SQLite pool.

pub mod campaigns;
pub mod invoices;
pub mod notes;
pub mod payment_links;
pub mod preferences;
pub mod runs;
pub mod schedules;
pub mod settings;
