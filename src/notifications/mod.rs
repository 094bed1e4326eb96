//! Subscriber notification delivery.

pub mod gateway;
pub mod hub;

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{NotificationConfig, TransportKind};
use crate::workflow::{ConnectionRecord, Notification, NotificationTransport, SendError};

pub use gateway::GatewayTransport;
pub use hub::LocalHub;

/// Tally of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutSummary {
    pub delivered: usize,
    /// Connections that were already closed or expired
    pub gone: usize,
    pub failed: usize,
}

impl FanOutSummary {
    pub fn dropped(&self) -> usize {
        self.gone + self.failed
    }
}

/// Sends one notification to many connections concurrently.
///
/// Individual delivery failures never fail the broadcast; they are logged
/// and counted.
#[derive(Clone)]
pub struct FanOutNotifier {
    transport: Arc<dyn NotificationTransport>,
}

impl FanOutNotifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    pub async fn broadcast(
        &self,
        connections: Vec<ConnectionRecord>,
        notification: Notification,
    ) -> FanOutSummary {
        let notification = Arc::new(notification);
        let mut sends = JoinSet::new();

        for connection in connections {
            let transport = Arc::clone(&self.transport);
            let notification = Arc::clone(&notification);
            sends.spawn(async move {
                let result = transport
                    .send(&connection.connection_id, &notification)
                    .await;
                (connection.connection_id, result)
            });
        }

        let mut summary = FanOutSummary::default();
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {
                    summary.delivered += 1;
                    counter!("repo_notifications_total", "result" => "delivered").increment(1);
                }
                Ok((connection_id, Err(SendError::ConnectionGone { .. }))) => {
                    summary.gone += 1;
                    counter!("repo_notifications_total", "result" => "gone").increment(1);
                    debug!(connection_id = %connection_id, "Connection is gone; skipping");
                }
                Ok((connection_id, Err(err))) => {
                    summary.failed += 1;
                    counter!("repo_notifications_total", "result" => "failed").increment(1);
                    warn!(
                        connection_id = %connection_id,
                        error = %err,
                        "Notification delivery failed"
                    );
                }
                Err(join_err) => {
                    summary.failed += 1;
                    counter!("repo_notifications_total", "result" => "failed").increment(1);
                    warn!(error = %join_err, "Notification task panicked or was cancelled");
                }
            }
        }

        summary
    }
}

/// Picks the transport named in configuration.
pub fn transport_from_config(
    config: &NotificationConfig,
    hub: Arc<LocalHub>,
) -> anyhow::Result<Arc<dyn NotificationTransport>> {
    match config.transport {
        TransportKind::Local => Ok(hub as Arc<dyn NotificationTransport>),
        TransportKind::Gateway => {
            let endpoint = config
                .gateway_endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("gateway transport requires an endpoint"))?;
            let transport =
                GatewayTransport::new(endpoint, Duration::from_secs(config.timeout_seconds))?;
            Ok(Arc::new(transport) as Arc<dyn NotificationTransport>)
        }
    }
}
