//! Snapshot store backed by the `repositories` table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, QueryOrder, Set};
use tracing::error;

use crate::models::repository::{self, Entity as Repository};
use crate::snapshot::Item;
use crate::workflow::{SnapshotStore, StoreError};

#[derive(Debug, Clone)]
pub struct SnapshotRepository {
    pub db: Arc<DatabaseConnection>,
}

impl SnapshotRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Decodes a row's JSON column, logging rows that are not tagged records.
    fn decode_row(row: repository::Model) -> Option<Item> {
        match serde_json::from_value(row.item) {
            Ok(item) => Some(item),
            Err(err) => {
                error!(
                    full_name = %row.full_name,
                    error = %err,
                    "Stored repository record is not a tagged attribute map"
                );
                None
            }
        }
    }
}

#[async_trait]
impl SnapshotStore for SnapshotRepository {
    async fn list_all(&self) -> Result<Vec<Item>, StoreError> {
        let rows = Repository::find()
            .order_by_asc(repository::Column::FullName)
            .all(&*self.db)
            .await?;

        Ok(rows.into_iter().filter_map(Self::decode_row).collect())
    }

    async fn get(&self, full_name: &str) -> Result<Option<Item>, StoreError> {
        let row = Repository::find_by_id(full_name.to_string())
            .one(&*self.db)
            .await?;
        Ok(row.and_then(Self::decode_row))
    }

    async fn upsert(&self, full_name: &str, item: &Item) -> Result<(), StoreError> {
        let json = serde_json::to_value(item).map_err(|source| StoreError::Serialize {
            key: full_name.to_string(),
            source,
        })?;
        let now = Utc::now();

        let row = repository::ActiveModel {
            full_name: Set(full_name.to_string()),
            item: Set(json),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        Repository::insert(row)
            .on_conflict(
                OnConflict::column(repository::Column::FullName)
                    .update_columns([repository::Column::Item, repository::Column::UpdatedAt])
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        Ok(())
    }

    async fn remove(&self, full_name: &str) -> Result<bool, StoreError> {
        let result = Repository::delete_by_id(full_name.to_string())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}
