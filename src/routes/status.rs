//! Server status API routes
//!
//! Read-only view of the session registry and of the maintenance loop's
//! reports. [`StatusBoard`] is the reporter the maintenance loop writes to.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::maintenance::{MaintenanceReporter, MaintenanceStats, ReportError};
use crate::session::{ClientId, CryptoState};
use crate::state::AppState;

// ============================================================================
// Status Board
// ============================================================================

/// Latest and cumulative maintenance results
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<MaintenanceSummary>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceSummary {
    pub cycles: u64,
    pub last_cycle: Option<MaintenanceStats>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub totals: MaintenanceStats,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> MaintenanceSummary {
        self.inner.lock().clone()
    }

    fn record(&self, stats: MaintenanceStats) {
        let mut summary = self.inner.lock();
        summary.cycles += 1;
        summary.last_cycle = Some(stats);
        summary.last_cycle_at = Some(Utc::now());
        summary.totals.evicted_sessions += stats.evicted_sessions;
        summary.totals.evicted_transfers += stats.evicted_transfers;
        summary.totals.failed_sessions += stats.failed_sessions;
    }
}

#[async_trait::async_trait]
impl MaintenanceReporter for StatusBoard {
    async fn report_maintenance_stats(&self, stats: MaintenanceStats) -> Result<(), ReportError> {
        self.record(stats);
        Ok(())
    }
}

// ============================================================================
// Routes
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub sessions: usize,
    pub live_transfers: usize,
    pub maintenance: MaintenanceSummary,
}

#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub id: ClientId,
    pub name: String,
    pub crypto_state: CryptoState,
    pub last_seen: DateTime<Utc>,
    pub live_transfers: usize,
}

/// Create the status router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/clients", get(list_clients))
}

/// Registry counts and maintenance history
async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let sessions = state.registry().snapshot_all();
    let live_transfers = sessions.iter().map(|s| s.transfer_count()).sum();

    Json(StatusResponse {
        sessions: sessions.len(),
        live_transfers,
        maintenance: state.status().summary(),
    })
}

/// Registered clients, most recently seen first
async fn list_clients(State(state): State<AppState>) -> Json<Vec<ClientSummary>> {
    let mut clients: Vec<_> = state
        .registry()
        .snapshot_all()
        .into_iter()
        .map(|session| {
            let guard = session.lock();
            ClientSummary {
                id: session.id(),
                name: session.name().to_string(),
                crypto_state: guard.crypto_state(),
                last_seen: guard.last_seen_at(),
                live_transfers: guard.transfers().len(),
            }
        })
        .collect();

    clients.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    Json(clients)
}

// ============================================================================
// Tests
// ============================================================================
