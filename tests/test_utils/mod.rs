//! Shared helpers for integration tests.

use std::sync::Arc;

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use repo_tracker::config::GitHubConfig;
use repo_tracker::snapshot::RepositorySnapshot;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use serde_json::{Value, json};

/// In-memory SQLite database with all migrations applied.
///
/// A single pooled connection keeps every handle on the same in-memory file.
#[allow(dead_code)]
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt).await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

#[allow(dead_code)]
pub fn github_config(api_base: &str) -> GitHubConfig {
    GitHubConfig {
        api_base: api_base.to_string(),
        token: None,
        timeout_seconds: 2,
    }
}

#[allow(dead_code)]
pub fn snapshot(full_name: &str, last_updated: &str) -> RepositorySnapshot {
    RepositorySnapshot {
        full_name: full_name.to_string(),
        description: Some("Tracked repository".to_string()),
        language: Some("Rust".to_string()),
        stars: 500,
        forks: 50,
        subscribers_count: 20,
        open_issues_count: 3,
        created_at: "2020-01-01T00:00:00Z".to_string(),
        last_updated: last_updated.to_string(),
        avatar_url: None,
    }
}

/// A `GET /repos/{owner}/{repo}` response body.
#[allow(dead_code)]
pub fn github_repo_body(full_name: &str, updated_at: &str, stars: u64) -> Value {
    let owner = full_name.split('/').next().unwrap_or_default();
    json!({
        "id": 1296269,
        "full_name": full_name,
        "description": "This your first repo!",
        "language": "Rust",
        "stargazers_count": stars,
        "forks_count": 9,
        "subscribers_count": 42,
        "open_issues_count": 0,
        "created_at": "2011-01-26T19:01:12Z",
        "updated_at": updated_at,
        "owner": {
            "login": owner,
            "avatar_url": format!("https://avatars.example.com/{owner}")
        }
    })
}
