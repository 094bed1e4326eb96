//! Delivery through a remote connection-management endpoint.
//!
//! Mirrors the management API of hosted WebSocket gateways: a message is
//! posted to `{endpoint}/@connections/{connection_id}` and a `410 Gone`
//! response means the client has disconnected.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use crate::workflow::{Notification, NotificationTransport, SendError};

#[derive(Debug, Clone)]
pub struct GatewayTransport {
    http: Client,
    endpoint: Url,
}

impl GatewayTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut endpoint = Url::parse(endpoint)?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, endpoint })
    }

    fn connection_url(&self, connection_id: &str) -> Result<Url, url::ParseError> {
        let mut url = self.endpoint.join("@connections/")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .pop_if_empty()
            .push(connection_id);
        Ok(url)
    }
}

#[async_trait]
impl NotificationTransport for GatewayTransport {
    #[instrument(skip(self, notification))]
    async fn send(
        &self,
        connection_id: &str,
        notification: &Notification,
    ) -> Result<(), SendError> {
        let failed = |message: String| SendError::Failed {
            connection_id: connection_id.to_string(),
            message,
        };

        let url = self
            .connection_url(connection_id)
            .map_err(|e| failed(e.to_string()))?;

        let response = self
            .http
            .post(url)
            .json(notification)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Gateway responded");

        match status {
            s if s.is_success() => Ok(()),
            StatusCode::GONE => Err(SendError::ConnectionGone {
                connection_id: connection_id.to_string(),
            }),
            s => Err(failed(format!("gateway returned {s}"))),
        }
    }
}
