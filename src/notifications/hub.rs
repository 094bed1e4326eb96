//! In-process registry of live WebSocket sessions.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use crate::workflow::{Notification, NotificationTransport, SendError};

/// Messages buffered per session before sends start failing.
const SESSION_BUFFER: usize = 32;

/// Delivers notifications to WebSocket sessions held by this process.
///
/// Each session owns the receiving half of a bounded channel; the socket task
/// drains it and writes frames to the client.
#[derive(Debug, Default)]
pub struct LocalHub {
    sessions: RwLock<HashMap<String, mpsc::Sender<String>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and returns the stream of payloads addressed to it.
    pub async fn register(&self, connection_id: impl Into<String>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SESSION_BUFFER);
        self.sessions.write().await.insert(connection_id.into(), tx);
        rx
    }

    pub async fn unregister(&self, connection_id: &str) {
        self.sessions.write().await.remove(connection_id);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl NotificationTransport for LocalHub {
    async fn send(
        &self,
        connection_id: &str,
        notification: &Notification,
    ) -> Result<(), SendError> {
        let gone = || SendError::ConnectionGone {
            connection_id: connection_id.to_string(),
        };

        let payload = serde_json::to_string(notification).map_err(|e| SendError::Failed {
            connection_id: connection_id.to_string(),
            message: e.to_string(),
        })?;

        let sender = self.sessions.read().await.get(connection_id).cloned();
        let Some(sender) = sender else {
            return Err(gone());
        };

        match sender.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id, "Session closed; dropping from hub");
                self.unregister(connection_id).await;
                Err(gone())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(SendError::Failed {
                connection_id: connection_id.to_string(),
                message: "session backlog is full".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed() -> Notification {
        Notification::repository_changed("acme/widget")
    }

    #[tokio::test]
    async fn delivers_json_payload_to_registered_session() {
        let hub = LocalHub::new();
        let mut rx = hub.register("conn-1").await;

        hub.send("conn-1", &changed()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), r#"{"repoName":"acme/widget"}"#);
    }

    #[tokio::test]
    async fn unknown_session_is_gone() {
        let hub = LocalHub::new();
        let err = hub.send("missing", &changed()).await.unwrap_err();
        assert!(matches!(err, SendError::ConnectionGone { .. }));
    }

    #[tokio::test]
    async fn closed_session_is_gone_and_removed() {
        let hub = LocalHub::new();
        let rx = hub.register("conn-1").await;
        drop(rx);

        let err = hub.send("conn-1", &changed()).await.unwrap_err();

        assert!(matches!(err, SendError::ConnectionGone { .. }));
        assert_eq!(hub.session_count().await, 0);
    }

    #[tokio::test]
    async fn full_backlog_fails_without_removing_session() {
        let hub = LocalHub::new();
        let _rx = hub.register("conn-1").await;
        for _ in 0..SESSION_BUFFER {
            hub.send("conn-1", &changed()).await.unwrap();
        }

        let err = hub.send("conn-1", &changed()).await.unwrap_err();

        assert!(matches!(err, SendError::Failed { .. }));
        assert_eq!(hub.session_count().await, 1);
    }
}
