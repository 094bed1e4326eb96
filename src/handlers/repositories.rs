//! Tracked repository endpoints.

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::error::{ApiError, not_found, validation_error};
use crate::server::AppState;
use crate::snapshot::{RepositorySnapshot, is_valid_full_name};

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddRepositoryRequest {
    /// `owner/repo`
    pub full_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// List every tracked repository
#[utoipa::path(
    get,
    path = "/repositories",
    responses(
        (status = 200, description = "Tracked repositories", body = [RepositorySnapshot])
    ),
    tag = "repositories"
)]
pub async fn list_repositories(
    State(state): State<AppState>,
) -> Result<Json<Vec<RepositorySnapshot>>, ApiError> {
    let items = state.store.list_all().await?;

    let snapshots = items
        .iter()
        .filter_map(|item| match RepositorySnapshot::from_item(item) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(error = %err, "Skipping undecodable repository record");
                None
            }
        })
        .collect();

    Ok(Json(snapshots))
}

/// Fetch one tracked repository
#[utoipa::path(
    get,
    path = "/repositories/{owner}/{repo}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 200, description = "Stored snapshot", body = RepositorySnapshot),
        (status = 404, description = "Repository is not tracked", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn get_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<RepositorySnapshot>, ApiError> {
    let full_name = format!("{owner}/{repo}");
    let item = state
        .store
        .get(&full_name)
        .await?
        .ok_or_else(|| not_found(&format!("Repository {full_name} is not tracked")))?;

    Ok(Json(RepositorySnapshot::from_item(&item)?))
}

/// Start tracking a repository
///
/// The current state is fetched from GitHub and stored under GitHub's
/// canonical `full_name`.
#[utoipa::path(
    post,
    path = "/repositories",
    request_body = AddRepositoryRequest,
    responses(
        (status = 201, description = "Repository tracked", body = RepositorySnapshot),
        (status = 400, description = "Missing or malformed full_name", body = ApiError),
        (status = 404, description = "Repository does not exist on GitHub", body = ApiError),
        (status = 503, description = "GitHub temporarily unavailable", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn add_repository(
    State(state): State<AppState>,
    payload: Result<Json<AddRepositoryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RepositorySnapshot>), ApiError> {
    let Json(request) = payload?;

    let full_name = request
        .full_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| validation_error("full_name is required"))?;
    if !is_valid_full_name(&full_name) {
        return Err(validation_error("full_name must have the form owner/repo"));
    }

    let snapshot = state.fetcher.fetch(&full_name).await?;
    let item = snapshot.to_item()?;
    state.store.upsert(&snapshot.full_name, &item).await?;

    info!(full_name = %snapshot.full_name, "Repository added");
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Stop tracking a repository
#[utoipa::path(
    delete,
    path = "/repositories/{owner}/{repo}",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 200, description = "Repository removed", body = MessageResponse),
        (status = 404, description = "Repository is not tracked", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn remove_repository(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    let full_name = format!("{owner}/{repo}");
    if !state.store.remove(&full_name).await? {
        return Err(not_found(&format!("Repository {full_name} is not tracked")));
    }

    info!(%full_name, "Repository removed");
    Ok(Json(MessageResponse {
        message: format!("Repository {full_name} removed"),
    }))
}
