//! chaser-dn - Dunning Notification Service
//!
//! Maintains a local replica of accounts-receivable records from the ERP
//! and drives the multi-tier overdue-payment notification campaigns
//! against it. Runs are triggered by the built-in clock or on demand via
//! the admin API.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chaser_common::config::{self, ChaserConfig};
use chaser_common::events::EventBus;
use chaser_dn::erp::{ErpClient, HttpErpClient};
use chaser_dn::services::{HttpMailer, HttpPdfRenderer, Mailer, PdfRenderer};
use chaser_dn::AppState;

/// Command-line arguments for chaser-dn
#[derive(Parser, Debug)]
#[command(name = "chaser-dn")]
#[command(about = "Dunning notification service")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5860", env = "CHASER_PORT")]
    port: u16,

    /// Data folder holding the cache database
    #[arg(short, long, env = "CHASER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Path to the TOML config file
    #[arg(short, long, env = "CHASER_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chaser_dn=debug,chaser_common=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting chaser-dn (Dunning Notification Service)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let service_config = Arc::new(
        ChaserConfig::load(args.config.as_deref()).context("Failed to load configuration")?,
    );

    let data_dir = config::resolve_data_dir(args.data_dir.as_deref(), "CHASER_DATA_DIR");
    let db_path =
        config::prepare_database_path(&data_dir).context("Failed to prepare data folder")?;
    info!("Database: {}", db_path.display());

    let db_pool = chaser_common::db::init_pool(&db_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let event_bus = EventBus::new(256);

    // Collaborator clients are optional at startup: a missing endpoint is
    // reported when a run actually needs it, not here.
    let erp: Option<Arc<dyn ErpClient>> = match HttpErpClient::new(
        service_config.erp.base_url.as_deref(),
        service_config.erp.api_key.as_deref(),
        service_config.erp.page_size,
        service_config.erp.rate_limit_per_sec,
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("ERP adapter unavailable: {}", e);
            None
        }
    };

    let mailer: Option<Arc<dyn Mailer>> = match HttpMailer::new(
        service_config.mail.base_url.as_deref(),
        service_config.mail.api_key.as_deref(),
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Mail collaborator unavailable: {}", e);
            None
        }
    };

    let pdf: Option<Arc<dyn PdfRenderer>> =
        match HttpPdfRenderer::new(service_config.pdf.base_url.as_deref()) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("PDF collaborator unavailable: {}", e);
                None
            }
        };

    let state = AppState::new(
        db_pool,
        event_bus,
        service_config.clone(),
        erp,
        mailer,
        pdf,
    );

    spawn_clock(&state, service_config.service.run_interval_minutes.unwrap_or(0));

    let app = chaser_dn::build_router(state);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", args.port))
        .await
        .with_context(|| format!("Failed to bind port {}", args.port))?;
    info!("Listening on http://127.0.0.1:{}", args.port);
    info!("Health check: http://127.0.0.1:{}/health", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodic clock trigger. A tick is skipped while a run is still active,
/// so overlapping runs cannot happen from the clock.
fn spawn_clock(state: &AppState, interval_minutes: u64) {
    if interval_minutes == 0 {
        info!("Clock trigger disabled (run_interval_minutes = 0)");
        return;
    }

    let orchestrator = state.orchestrator.clone();
    let db = state.db.clone();

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_minutes * 60));
        // The first tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;

        info!(interval_minutes, "Clock trigger active");

        loop {
            ticker.tick().await;

            match chaser_dn::db::runs::has_running_run(&db).await {
                Ok(true) => {
                    warn!("Clock tick skipped: a run is still active");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Clock tick skipped: {}", e);
                    continue;
                }
            }

            let run_id = match orchestrator.begin_run("clock", false).await {
                Ok(id) => id,
                Err(e) => {
                    warn!("Clock-triggered run refused: {}", e);
                    continue;
                }
            };

            if let Err(e) = orchestrator.execute_run(run_id, false).await {
                tracing::error!(run_id, error = %e, "Clock-triggered run failed");
            }
        }
    });
}
