//! Run orchestration
//!
//! One invocation = one run-log row, driven through the fixed phase
//! order: pre-flight, cache sync, enrichment, schedule pass per campaign
//! (ascending trigger day), send pass, test-row purge, finalize. A
//! failure in one campaign's schedule pass is absorbed so later campaigns
//! and the send pass still run; only configuration errors and
//! adapter/store-unreachable conditions fail the whole run. Either way
//! the run row always reaches a terminal status with aggregate counters.

use crate::config::RunConfiguration;
use crate::db::runs::{self, DunningRun, RunCounters};
use crate::db::{campaigns, schedules};
use crate::erp::ErpClient;
use crate::services::mail_client::Mailer;
use crate::services::notes_enricher::NotesEnricher;
use crate::services::payment_links::PaymentLinkBuilder;
use crate::services::pdf_client::PdfRenderer;
use crate::services::scheduler::CampaignScheduler;
use crate::services::sender::SendPipeline;
use crate::services::status_catalog::StatusCatalog;
use crate::services::synchronizer::CacheSynchronizer;
use crate::services::safety;
use chaser_common::config::ChaserConfig;
use chaser_common::events::{ChaserEvent, EventBus};
use chaser_common::{Error, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Run orchestrator service
pub struct RunOrchestrator {
    db: SqlitePool,
    event_bus: EventBus,
    service_config: Arc<ChaserConfig>,
    erp: Option<Arc<dyn ErpClient>>,
    mailer: Option<Arc<dyn Mailer>>,
    pdf: Option<Arc<dyn PdfRenderer>>,
}

impl RunOrchestrator {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        service_config: Arc<ChaserConfig>,
        erp: Option<Arc<dyn ErpClient>>,
        mailer: Option<Arc<dyn Mailer>>,
        pdf: Option<Arc<dyn PdfRenderer>>,
    ) -> Self {
        Self {
            db,
            event_bus,
            service_config,
            erp,
            mailer,
            pdf,
        }
    }

    /// The configured mail collaborator, if any
    pub fn mailer(&self) -> Option<Arc<dyn Mailer>> {
        self.mailer.clone()
    }

    /// Create the run-log row for a new invocation. Refuses when another
    /// run is still active: the design assumes a single active run.
    pub async fn begin_run(&self, trigger: &str, test_mode: bool) -> Result<i64> {
        if runs::has_running_run(&self.db).await? {
            return Err(Error::InvalidInput("a run is already active".to_string()));
        }

        let run_id =
            runs::create_running(&self.db, trigger, test_mode, &Utc::now().to_rfc3339()).await?;

        tracing::info!(run_id, trigger, test_mode, "Dunning run started");
        self.event_bus.emit_lossy(ChaserEvent::RunStarted {
            run_id,
            trigger: trigger.to_string(),
            test_mode,
            timestamp: Utc::now(),
        });

        Ok(run_id)
    }

    /// Execute a run created by [`begin_run`] to its terminal state. All
    /// phase failures are captured into the run row; the returned error
    /// only signals that the store itself became unreachable.
    pub async fn execute_run(&self, run_id: i64, test_mode: bool) -> Result<DunningRun> {
        let started_at = Utc::now();
        let mut counters = RunCounters::default();

        let outcome = self
            .run_phases(run_id, test_mode, started_at, &mut counters)
            .await;

        let (status, error) = match &outcome {
            Ok(()) => ("completed", None),
            Err(e) => {
                tracing::error!(run_id, error = %e, "Dunning run failed");
                ("failed", Some(e.to_string()))
            }
        };

        runs::finalize(
            &self.db,
            run_id,
            status,
            &counters,
            error.as_deref(),
            &Utc::now().to_rfc3339(),
        )
        .await?;

        self.event_bus.emit_lossy(ChaserEvent::RunCompleted {
            run_id,
            status: status.to_string(),
            processed: counters.processed,
            scheduled: counters.scheduled,
            sent: counters.sent,
            failed: counters.failed,
            skipped: counters.skipped,
            timestamp: Utc::now(),
        });

        tracing::info!(
            run_id,
            status,
            processed = counters.processed,
            scheduled = counters.scheduled,
            sent = counters.sent,
            failed = counters.failed,
            skipped = counters.skipped,
            "Dunning run finished"
        );

        runs::get(&self.db, run_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("run {run_id}")))
    }

    async fn run_phases(
        &self,
        run_id: i64,
        test_mode: bool,
        started_at: DateTime<Utc>,
        counters: &mut RunCounters,
    ) -> Result<()> {
        // Configuration snapshot and collaborator availability come first,
        // before any side effect is attempted.
        let config = RunConfiguration::load(&self.db, &self.service_config, test_mode).await?;

        let erp = self
            .erp
            .clone()
            .ok_or_else(|| Error::Config("ERP adapter not configured".to_string()))?;
        let mailer = self
            .mailer
            .clone()
            .ok_or_else(|| Error::Config("mail collaborator not configured".to_string()))?;

        let preflight = safety::preflight(&self.db, &config).await?;
        for warning in &preflight.warnings {
            tracing::warn!(run_id, warning = %warning, "Pre-flight warning");
        }

        // Phase 1: cache synchronization
        let catalog = StatusCatalog::standard();
        let synchronizer = CacheSynchronizer::new(self.db.clone(), erp.clone());
        let summary = synchronizer.synchronize(&catalog, &config).await?;
        self.event_bus.emit_lossy(ChaserEvent::SyncCompleted {
            run_id,
            inserted: summary.inserted,
            updated: summary.updated,
            deleted: summary.deleted,
            total: summary.total,
            timestamp: Utc::now(),
        });

        // Phase 2: enrichment sub-flows over the freshly synced set
        let notes = NotesEnricher::new(self.db.clone(), erp.clone())
            .enrich(&config)
            .await?;
        let links = PaymentLinkBuilder::new(self.db.clone(), erp.clone())
            .build_missing(&config)
            .await?;
        self.event_bus.emit_lossy(ChaserEvent::EnrichmentCompleted {
            run_id,
            notes_refreshed: notes.orders_refreshed,
            contacts_resolved: notes.contacts_resolved,
            links_created: links.links_created,
            timestamp: Utc::now(),
        });

        // Phase 3: schedule pass, campaigns in ascending trigger-day order.
        // One campaign failing must not prevent the others.
        let scheduler = CampaignScheduler::new(self.db.clone());
        for campaign in campaigns::list_active_ordered(&self.db).await? {
            match scheduler.schedule_campaign(&campaign, &config).await {
                Ok(stats) => {
                    counters.processed += stats.processed;
                    counters.scheduled += stats.scheduled;
                    counters.skipped += stats.skipped;
                    self.event_bus.emit_lossy(ChaserEvent::CampaignScheduled {
                        run_id,
                        campaign_id: campaign.id,
                        scheduled: stats.scheduled,
                        skipped: stats.skipped,
                        timestamp: Utc::now(),
                    });
                }
                Err(e) => {
                    tracing::error!(
                        run_id,
                        campaign_id = campaign.id,
                        error = %e,
                        "Schedule pass failed for campaign, continuing with the rest"
                    );
                }
            }
        }

        // Phase 4: send pass across all campaigns
        let pipeline = SendPipeline::new(self.db.clone(), mailer, self.pdf.clone());
        let send = pipeline.process_due(&config, started_at).await?;
        counters.sent += send.sent;
        counters.failed += send.failed;
        counters.skipped += send.skipped;
        self.event_bus.emit_lossy(ChaserEvent::SendPassCompleted {
            run_id,
            sent: send.sent,
            failed: send.failed,
            skipped: send.skipped,
            timestamp: Utc::now(),
        });

        // Phase 5: test invocations leave no rows behind
        if test_mode {
            let purged = schedules::purge_test_rows(&self.db).await?;
            tracing::info!(run_id, purged, "Purged test schedule rows");
        }

        Ok(())
    }
}
