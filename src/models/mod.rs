//! # Data Models
//!
//! SeaORM entities for tracked repositories and subscriber connections, plus
//! small response types shared by handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod connection;
pub mod repository;

pub use connection::Entity as Connection;
pub use repository::Entity as Repository;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "repo-tracker".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
