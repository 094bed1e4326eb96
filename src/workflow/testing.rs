//! In-memory collaborators for exercising the workflow without I/O.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sea_orm::DbErr;
use tokio::sync::Mutex;

use super::ports::*;
use crate::github::RepositorySearch;
use crate::snapshot::{Item, RepositorySnapshot, require_str};

#[derive(Default)]
pub struct MemoryStore {
    pub items: Mutex<BTreeMap<String, Item>>,
    pub writes: AtomicUsize,
    pub fail_upserts: bool,
}

impl MemoryStore {
    pub fn with_items(items: Vec<Item>) -> Self {
        let items = items
            .into_iter()
            .map(|item| {
                let key = require_str(&item, "full_name").unwrap_or_default().to_string();
                (key, item)
            })
            .collect();
        Self {
            items: Mutex::new(items),
            ..Default::default()
        }
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn list_all(&self) -> Result<Vec<Item>, StoreError> {
        Ok(self.items.lock().await.values().cloned().collect())
    }

    async fn get(&self, full_name: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.items.lock().await.get(full_name).cloned())
    }

    async fn upsert(&self, full_name: &str, item: &Item) -> Result<(), StoreError> {
        if self.fail_upserts {
            return Err(StoreError::Database(DbErr::Custom("store unavailable".into())));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.items
            .lock()
            .await
            .insert(full_name.to_string(), item.clone());
        Ok(())
    }

    async fn remove(&self, full_name: &str) -> Result<bool, StoreError> {
        Ok(self.items.lock().await.remove(full_name).is_some())
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    pub connections: Mutex<Vec<ConnectionRecord>>,
    pub fail_listing: bool,
}

impl MemoryRegistry {
    pub fn with_ids(ids: &[&str]) -> Self {
        let connections = ids
            .iter()
            .map(|id| ConnectionRecord {
                connection_id: id.to_string(),
                expires_at: i64::MAX,
            })
            .collect();
        Self {
            connections: Mutex::new(connections),
            fail_listing: false,
        }
    }
}

#[async_trait]
impl ConnectionRegistry for MemoryRegistry {
    async fn list_active(&self, now: i64) -> Result<Vec<ConnectionRecord>, StoreError> {
        if self.fail_listing {
            return Err(StoreError::Database(DbErr::Custom("registry unavailable".into())));
        }
        Ok(self
            .connections
            .lock()
            .await
            .iter()
            .filter(|c| c.expires_at > now)
            .cloned()
            .collect())
    }

    async fn save(&self, connection_id: &str, expires_at: i64) -> Result<(), StoreError> {
        let mut connections = self.connections.lock().await;
        connections.retain(|c| c.connection_id != connection_id);
        connections.push(ConnectionRecord {
            connection_id: connection_id.to_string(),
            expires_at,
        });
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        self.connections
            .lock()
            .await
            .retain(|c| c.connection_id != connection_id);
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        let mut connections = self.connections.lock().await;
        let before = connections.len();
        connections.retain(|c| c.expires_at > now);
        Ok((before - connections.len()) as u64)
    }
}

/// Replays scripted responses per repository; the last response repeats.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, VecDeque<Result<RepositorySnapshot, FetchError>>>>,
    calls: Mutex<HashMap<String, usize>>,
    searches: Mutex<HashMap<String, Result<Vec<RepositorySnapshot>, FetchError>>>,
}

impl ScriptedFetcher {
    pub async fn respond(&self, full_name: &str, response: Result<RepositorySnapshot, FetchError>) {
        self.responses
            .lock()
            .await
            .entry(full_name.to_string())
            .or_default()
            .push_back(response);
    }

    /// Scripts the result of searching for `query`; unscripted queries find nothing.
    pub async fn respond_search(
        &self,
        query: &str,
        response: Result<Vec<RepositorySnapshot>, FetchError>,
    ) {
        self.searches
            .lock()
            .await
            .insert(query.to_string(), response);
    }

    pub async fn calls_for(&self, full_name: &str) -> usize {
        self.calls.lock().await.get(full_name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SourceFetcher for ScriptedFetcher {
    async fn fetch(&self, full_name: &str) -> Result<RepositorySnapshot, FetchError> {
        *self
            .calls
            .lock()
            .await
            .entry(full_name.to_string())
            .or_default() += 1;

        let mut responses = self.responses.lock().await;
        let queue = responses.entry(full_name.to_string()).or_default();
        match queue.len() {
            0 => Err(FetchError::NotFound {
                full_name: full_name.to_string(),
            }),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap_or_else(|| {
                Err(FetchError::NotFound {
                    full_name: full_name.to_string(),
                })
            }),
        }
    }
}

#[async_trait]
impl RepositorySearch for ScriptedFetcher {
    async fn search(&self, query: &str) -> Result<Vec<RepositorySnapshot>, FetchError> {
        self.searches
            .lock()
            .await
            .get(query)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// Records delivered notifications; ids in `gone` are reported closed.
#[derive(Default)]
pub struct RecordingTransport {
    pub gone: HashSet<String>,
    pub delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    pub fn with_gone(ids: &[&str]) -> Self {
        Self {
            gone: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    pub async fn deliveries(&self) -> Vec<(String, String)> {
        let mut delivered = self.delivered.lock().await.clone();
        delivered.sort();
        delivered
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(
        &self,
        connection_id: &str,
        notification: &Notification,
    ) -> Result<(), SendError> {
        if self.gone.contains(connection_id) {
            return Err(SendError::ConnectionGone {
                connection_id: connection_id.to_string(),
            });
        }
        self.delivered
            .lock()
            .await
            .push((connection_id.to_string(), notification.repo_name.clone()));
        Ok(())
    }
}
