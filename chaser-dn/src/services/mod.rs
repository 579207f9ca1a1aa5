//! Domain services for chaser-dn

pub mod eligibility;
pub mod mail_client;
pub mod notes_enricher;
pub mod orchestrator;
pub mod payment_links;
pub mod pdf_client;
pub mod safety;
pub mod scheduler;
pub mod sender;
pub mod status_catalog;
pub mod synchronizer;
pub mod template;

pub use mail_client::{HttpMailer, MailError, Mailer, OutboundEmail};
pub use orchestrator::RunOrchestrator;
pub use pdf_client::{HttpPdfRenderer, PdfError, PdfRenderer};
pub use status_catalog::StatusCatalog;
pub use synchronizer::{CacheSynchronizer, SyncSummary};
