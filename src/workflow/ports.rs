//! Interfaces the refresh workflow is driven through.
//!
//! Production wiring uses the GitHub client, the sea-orm repositories and one
//! of the notification transports; tests substitute in-memory fakes.

use async_trait::async_trait;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

use crate::retry::Retryable;
use crate::snapshot::{Item, RepositorySnapshot};

/// Failure to obtain the current state of a repository upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("repository {full_name} was not found upstream")]
    NotFound { full_name: String },

    /// Network failures, timeouts, rate limits and upstream 5xx responses
    #[error("transient upstream failure: {message}")]
    Transient { message: String },

    #[error("upstream request failed: {message}")]
    Permanent { message: String },
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }
}

/// Failure to deliver a notification to one connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection is closed or expired; it will never accept messages again.
    #[error("connection {connection_id} is gone")]
    ConnectionGone { connection_id: String },

    #[error("failed to deliver to connection {connection_id}: {message}")]
    Failed {
        connection_id: String,
        message: String,
    },
}

/// Failure inside the snapshot store or connection registry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("failed to serialize record {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Payload broadcast to subscribers when a repository changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub repo_name: String,
}

impl Notification {
    pub fn repository_changed(full_name: impl Into<String>) -> Self {
        Self {
            repo_name: full_name.into(),
        }
    }
}

/// An open subscriber connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub connection_id: String,
    /// Unix seconds after which the connection is no longer valid
    pub expires_at: i64,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, full_name: &str) -> Result<RepositorySnapshot, FetchError>;
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// All stored snapshots in storage encoding.
    async fn list_all(&self) -> Result<Vec<Item>, StoreError>;

    async fn get(&self, full_name: &str) -> Result<Option<Item>, StoreError>;

    /// Inserts or replaces the record stored under `full_name`.
    async fn upsert(&self, full_name: &str, item: &Item) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    async fn remove(&self, full_name: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Connections whose `expires_at` is later than `now` (unix seconds).
    async fn list_active(&self, now: i64) -> Result<Vec<ConnectionRecord>, StoreError>;

    async fn save(&self, connection_id: &str, expires_at: i64) -> Result<(), StoreError>;

    async fn delete(&self, connection_id: &str) -> Result<(), StoreError>;

    /// Removes expired connections and returns how many were dropped.
    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, connection_id: &str, notification: &Notification) -> Result<(), SendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_uses_camel_case_payload() {
        let payload =
            serde_json::to_value(Notification::repository_changed("acme/widget")).unwrap();
        assert_eq!(payload, serde_json::json!({ "repoName": "acme/widget" }));
    }

    #[test]
    fn only_transient_fetch_errors_are_retryable() {
        assert!(FetchError::transient("timeout").is_retryable());
        assert!(!FetchError::permanent("bad request").is_retryable());
        assert!(
            !FetchError::NotFound {
                full_name: "acme/widget".into()
            }
            .is_retryable()
        );
    }
}
