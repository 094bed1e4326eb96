//! # API Handlers
//!
//! HTTP endpoints for service status, tracked repositories, GitHub search and the
//! notification WebSocket.

pub mod repositories;
pub mod search;
pub mod websocket;

use axum::{extract::State, response::Json};

use crate::db;
use crate::error::{ApiError, ErrorType};
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness check backed by a database ping
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = String),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn health(State(state): State<AppState>) -> Result<&'static str, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::warn!(error = %err, "Health check failed");
        ApiError::from(ErrorType::ServiceUnavailable)
    })?;
    Ok("OK")
}
