//! Event types for the Chaser event system
//!
//! Run progress events are broadcast on an in-process bus and forwarded to
//! SSE clients by the admin API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Chaser event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChaserEvent {
    /// A dunning run was started
    RunStarted {
        run_id: i64,
        trigger: String,
        test_mode: bool,
        timestamp: DateTime<Utc>,
    },

    /// Cache synchronization finished
    SyncCompleted {
        run_id: i64,
        inserted: u64,
        updated: u64,
        deleted: u64,
        total: u64,
        timestamp: DateTime<Utc>,
    },

    /// Enrichment sub-flows finished
    EnrichmentCompleted {
        run_id: i64,
        notes_refreshed: u64,
        contacts_resolved: u64,
        links_created: u64,
        timestamp: DateTime<Utc>,
    },

    /// Schedule pass finished for one campaign
    CampaignScheduled {
        run_id: i64,
        campaign_id: i64,
        scheduled: u64,
        skipped: u64,
        timestamp: DateTime<Utc>,
    },

    /// Send pass finished
    SendPassCompleted {
        run_id: i64,
        sent: u64,
        failed: u64,
        skipped: u64,
        timestamp: DateTime<Utc>,
    },

    /// Run reached a terminal state
    RunCompleted {
        run_id: i64,
        status: String,
        processed: u64,
        scheduled: u64,
        sent: u64,
        failed: u64,
        skipped: u64,
        timestamp: DateTime<Utc>,
    },

    /// All campaigns were deactivated by the emergency stop
    EmergencyStop {
        campaigns_deactivated: u64,
        timestamp: DateTime<Utc>,
    },
}

impl ChaserEvent {
    /// Event type name for SSE event framing
    pub fn event_type(&self) -> &'static str {
        match self {
            ChaserEvent::RunStarted { .. } => "RunStarted",
            ChaserEvent::SyncCompleted { .. } => "SyncCompleted",
            ChaserEvent::EnrichmentCompleted { .. } => "EnrichmentCompleted",
            ChaserEvent::CampaignScheduled { .. } => "CampaignScheduled",
            ChaserEvent::SendPassCompleted { .. } => "SendPassCompleted",
            ChaserEvent::RunCompleted { .. } => "RunCompleted",
            ChaserEvent::EmergencyStop { .. } => "EmergencyStop",
        }
    }
}

/// Broadcast bus for Chaser events
///
/// Thin wrapper over a tokio broadcast channel. Emission is lossy: events
/// sent with no subscribers are dropped silently, and slow subscribers may
/// miss events when the buffer wraps.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChaserEvent>,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChaserEvent> {
        self.tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: ChaserEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently connected subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
