//! chaser-dn library interface
//!
//! Exposes the dunning service's components for integration testing: the
//! ERP adapter, the cache store modules, the campaign engine services,
//! and the admin API router.

pub mod api;
pub mod config;
pub mod db;
pub mod erp;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use crate::erp::ErpClient;
use crate::services::{Mailer, PdfRenderer, RunOrchestrator};
use axum::Router;
use chaser_common::config::ChaserConfig;
use chaser_common::events::EventBus;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Run orchestrator, shared with the clock loop
    pub orchestrator: Arc<RunOrchestrator>,
    /// Static service configuration
    pub service_config: Arc<ChaserConfig>,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        service_config: Arc<ChaserConfig>,
        erp: Option<Arc<dyn ErpClient>>,
        mailer: Option<Arc<dyn Mailer>>,
        pdf: Option<Arc<dyn PdfRenderer>>,
    ) -> Self {
        let orchestrator = Arc::new(RunOrchestrator::new(
            db.clone(),
            event_bus.clone(),
            service_config.clone(),
            erp,
            mailer,
            pdf,
        ));

        Self {
            db,
            event_bus,
            orchestrator,
            service_config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::health::routes())
        .merge(api::runs::routes())
        .merge(api::campaigns::routes())
        .merge(api::schedules::routes())
        .merge(api::preferences::routes())
        .merge(api::test_send::routes())
        .route("/events", get(api::sse::event_stream))
        .with_state(state)
}
