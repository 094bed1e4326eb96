//! Background loops: scheduled refresh runs and expired-connection cleanup.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::workflow::{ConnectionRegistry, Orchestrator};

/// Triggers a refresh run on a fixed interval.
///
/// Runs are awaited inline, so a slow run delays the next trigger rather
/// than overlapping with it.
pub struct RefreshScheduler {
    orchestrator: Orchestrator,
    interval: Duration,
}

impl RefreshScheduler {
    pub fn new(orchestrator: Orchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    #[instrument(skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Refresh scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Refresh scheduler shutdown requested");
                    break;
                }
                _ = sleep(self.interval) => {
                    match self.orchestrator.run().await {
                        Ok(report) => debug!(
                            run_id = %report.run_id,
                            branches = report.branches.len(),
                            "Scheduled refresh completed"
                        ),
                        Err(err) => error!(error = %err, "Scheduled refresh failed"),
                    }
                }
            }
        }

        info!("Refresh scheduler stopped");
    }
}

/// Periodically deletes connections whose TTL has elapsed.
pub struct ConnectionReaper {
    registry: Arc<dyn ConnectionRegistry>,
    interval: Duration,
}

impl ConnectionReaper {
    pub fn new(registry: Arc<dyn ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// One purge pass; returns the number of rows removed.
    pub async fn sweep(&self) -> u64 {
        match self.registry.purge_expired(Utc::now().timestamp()).await {
            Ok(0) => 0,
            Ok(purged) => {
                counter!("repo_connections_expired_total").increment(purged);
                info!(purged, "Purged expired connections");
                purged
            }
            Err(err) => {
                error!(error = %err, "Failed to purge expired connections");
                0
            }
        }
    }

    #[instrument(skip_all, fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {
                    self.sweep().await;
                }
            }
        }
        debug!("Connection reaper stopped");
    }
}
