//! Connection registry backed by the `connections` table.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::models::connection::{self, Entity as Connection};
use crate::workflow::{ConnectionRecord, ConnectionRegistry, StoreError};

#[derive(Debug, Clone)]
pub struct ConnectionRepository {
    pub db: Arc<DatabaseConnection>,
}

impl ConnectionRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl From<connection::Model> for ConnectionRecord {
    fn from(model: connection::Model) -> Self {
        Self {
            connection_id: model.connection_id,
            expires_at: model.expires_at,
        }
    }
}

#[async_trait]
impl ConnectionRegistry for ConnectionRepository {
    async fn list_active(&self, now: i64) -> Result<Vec<ConnectionRecord>, StoreError> {
        let rows = Connection::find()
            .filter(connection::Column::ExpiresAt.gt(now))
            .order_by_asc(connection::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(ConnectionRecord::from).collect())
    }

    /// Registers a connection, refreshing `expires_at` if it already exists.
    async fn save(&self, connection_id: &str, expires_at: i64) -> Result<(), StoreError> {
        let row = connection::ActiveModel {
            connection_id: Set(connection_id.to_string()),
            expires_at: Set(expires_at),
            created_at: Set(Utc::now().into()),
        };

        Connection::insert(row)
            .on_conflict(
                OnConflict::column(connection::Column::ConnectionId)
                    .update_column(connection::Column::ExpiresAt)
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    async fn delete(&self, connection_id: &str) -> Result<(), StoreError> {
        Connection::delete_by_id(connection_id.to_string())
            .exec(&*self.db)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: i64) -> Result<u64, StoreError> {
        let result = Connection::delete_many()
            .filter(connection::Column::ExpiresAt.lte(now))
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
