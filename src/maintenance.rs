//! Maintenance Loop
//!
//! Periodic sweep over the session registry:
//! - Evicts sessions idle longer than the session timeout
//! - Drops partial transfers idle longer than the transfer timeout
//! - Hands the cycle's totals to a reporter without blocking the next cycle

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::MaintenanceConfig;
use crate::session::{ClientSession, SessionRegistry};

// ============================================================================
// Reporting
// ============================================================================

/// Totals for one maintenance cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceStats {
    pub evicted_sessions: usize,
    pub evicted_transfers: usize,
    /// Sessions whose sweep panicked and was skipped
    pub failed_sessions: usize,
}

impl MaintenanceStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Reporter unavailable: {0}")]
    Unavailable(String),
}

/// Receives the totals of every maintenance cycle
#[async_trait::async_trait]
pub trait MaintenanceReporter: Send + Sync {
    async fn report_maintenance_stats(&self, stats: MaintenanceStats) -> Result<(), ReportError>;
}

// ============================================================================
// Maintenance Loop
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceSettings {
    pub interval: Duration,
    pub session_timeout: Duration,
    pub transfer_timeout: Duration,
    pub report_timeout: Duration,
}

impl From<&MaintenanceConfig> for MaintenanceSettings {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            interval: config.interval(),
            session_timeout: config.session_timeout(),
            transfer_timeout: config.transfer_timeout(),
            report_timeout: config.report_timeout(),
        }
    }
}

#[derive(Clone)]
pub struct MaintenanceLoop {
    registry: SessionRegistry,
    reporter: Arc<dyn MaintenanceReporter>,
    settings: MaintenanceSettings,
}

impl MaintenanceLoop {
    pub fn new(
        registry: SessionRegistry,
        reporter: Arc<dyn MaintenanceReporter>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            registry,
            reporter,
            settings,
        }
    }

    /// Run one sweep at `now`
    ///
    /// Works on a snapshot so the registry lock is only held per eviction.
    pub fn run_cycle(&self, now: Instant) -> MaintenanceStats {
        self.run_cycle_with(now, ClientSession::sweep_stale)
    }

    /// Run one sweep, dropping stale transfers of each surviving session with
    /// `sweep`. A panic in `sweep` skips that session only.
    pub fn run_cycle_with<F>(&self, now: Instant, sweep: F) -> MaintenanceStats
    where
        F: Fn(&ClientSession, Instant, Duration) -> usize,
    {
        let mut stats = MaintenanceStats::default();

        for session in self.registry.snapshot_all() {
            if let Some(evicted) =
                self.registry
                    .evict_if_idle(session.id(), now, self.settings.session_timeout)
            {
                tracing::info!(
                    client_id = %evicted.id(),
                    name = %evicted.name(),
                    "Evicted idle session"
                );
                stats.evicted_sessions += 1;
                continue;
            }

            let timeout = self.settings.transfer_timeout;
            match catch_unwind(AssertUnwindSafe(|| sweep(&*session, now, timeout))) {
                Ok(0) => {}
                Ok(removed) => {
                    tracing::info!(
                        client_id = %session.id(),
                        removed = removed,
                        "Dropped stale transfers"
                    );
                    stats.evicted_transfers += removed;
                }
                Err(_) => {
                    tracing::error!(
                        client_id = %session.id(),
                        "Transfer sweep panicked, skipping session"
                    );
                    stats.failed_sessions += 1;
                }
            }
        }

        stats
    }

    /// Hand `stats` to the reporter on its own task, bounded by the report timeout
    pub fn report(&self, stats: MaintenanceStats) -> tokio::task::JoinHandle<()> {
        let reporter = Arc::clone(&self.reporter);
        let limit = self.settings.report_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(limit, reporter.report_maintenance_stats(stats)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "Failed to report maintenance stats"),
                Err(_) => tracing::warn!(timeout = ?limit, "Maintenance report timed out"),
            }
        })
    }

    /// Start the background sweep
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;

                let stats = self.run_cycle(Instant::now());
                if !stats.is_empty() {
                    tracing::info!(
                        evicted_sessions = stats.evicted_sessions,
                        evicted_transfers = stats.evicted_transfers,
                        failed_sessions = stats.failed_sessions,
                        "Maintenance cycle complete"
                    );
                }
                self.report(stats);
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
