//! Database pool setup, migrations and health checks.
//!
//! Both SQLite (the default, file-backed) and Postgres URLs are accepted.

use std::time::Duration;

use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

use crate::config::AppConfig;
use crate::retry::{JitterStrategy, Retryable, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("failed to connect to database: {source}")]
    ConnectionFailed {
        #[from]
        source: DbErr,
    },
    #[error("invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

impl Retryable for DatabaseError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionFailed {
                source: DbErr::Conn(_) | DbErr::ConnectionAcquire(_)
            }
        )
    }
}

fn connect_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        interval: Duration::from_millis(100),
        backoff_rate: 2.0,
        jitter: JitterStrategy::None,
    }
}

/// Opens the connection pool, retrying connection failures with backoff.
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.trim().is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    let conn = connect_policy()
        .retry(|attempt| {
            let opt = opt.clone();
            async move {
                let conn = Database::connect(opt).await?;
                log::info!("Connected to database (attempt {attempt})");
                Ok::<_, DatabaseError>(conn)
            }
        })
        .await?;

    Ok(conn)
}

/// Applies all pending schema migrations.
pub async fn migrate(db: &DatabaseConnection) -> Result<()> {
    Migrator::up(db, None)
        .await
        .context("failed to apply database migrations")
}

/// Verifies the pool can still execute a query.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());
    db.query_one(stmt)
        .await
        .context("database health check failed")?;
    Ok(())
}
