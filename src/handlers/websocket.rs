//! Notification WebSocket.
//!
//! Every accepted socket becomes a subscriber: it is registered with a TTL so
//! refresh runs can find it, and attached to the in-process hub so
//! notifications reach it. Closing the socket removes both.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::server::AppState;
use crate::workflow::StoreError;

/// Subscribe to repository change notifications
///
/// Upgrades to a WebSocket. Each change is pushed as a text frame
/// `{"repoName": "owner/repo"}`.
#[utoipa::path(
    get,
    path = "/ws",
    responses(
        (status = 101, description = "Switching protocols to WebSocket")
    ),
    tag = "notifications"
)]
pub async fn subscribe(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

/// A registered subscriber and its outbound message queue.
pub struct Session {
    pub connection_id: String,
    pub outbound: mpsc::Receiver<String>,
}

impl Session {
    /// Registers a new connection with the configured TTL and attaches it to the hub.
    pub async fn open(state: &AppState) -> Result<Self, StoreError> {
        let connection_id = Uuid::new_v4().to_string();
        let ttl = state.config.notifications.connection_ttl_seconds as i64;
        let expires_at = Utc::now().timestamp() + ttl;

        state.registry.save(&connection_id, expires_at).await?;
        let outbound = state.hub.register(connection_id.clone()).await;

        info!(%connection_id, expires_at, "Subscriber connected");
        Ok(Self {
            connection_id,
            outbound,
        })
    }

    pub async fn close(self, state: &AppState) {
        state.hub.unregister(&self.connection_id).await;
        if let Err(err) = state.registry.delete(&self.connection_id).await {
            error!(
                connection_id = %self.connection_id,
                error = %err,
                "Failed to delete connection"
            );
        }
        info!(connection_id = %self.connection_id, "Subscriber disconnected");
    }
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let mut session = match Session::open(&state).await {
        Ok(session) => session,
        Err(err) => {
            error!(error = %err, "Failed to register subscriber; closing socket");
            return;
        }
    };

    let span = info_span!("subscriber", connection_id = %session.connection_id);
    pump(socket, &mut session.outbound).instrument(span).await;

    session.close(&state).await;
}

/// Forwards hub payloads to the client and logs client messages until either side closes.
async fn pump(socket: WebSocket, outbound: &mut mpsc::Receiver<String>) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                if let Err(err) = sink.send(Message::Text(payload.into())).await {
                    debug!(error = %err, "Client went away while sending");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    info!(message = %text.as_str(), "Message received from subscriber");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "WebSocket receive failed");
                    break;
                }
            }
        }
    }
}
