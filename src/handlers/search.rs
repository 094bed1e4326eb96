//! GitHub repository search.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use tracing::{info, warn};
use utoipa::IntoParams;

use crate::error::{ApiError, validation_error};
use crate::server::AppState;
use crate::snapshot::RepositorySnapshot;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// GitHub search expression, e.g. `tokio language:rust`
    pub q: Option<String>,
}

/// Search GitHub for repositories to track
///
/// Upstream failures, rate limiting included, yield an empty result rather
/// than an error.
#[utoipa::path(
    get,
    path = "/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "Matching repositories", body = [RepositorySnapshot]),
        (status = 400, description = "Missing query parameter", body = ApiError)
    ),
    tag = "repositories"
)]
pub async fn search_repositories(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<RepositorySnapshot>>, ApiError> {
    let q = query
        .q
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| validation_error("Missing query parameter"))?;

    let results = match state.search.search(&q).await {
        Ok(results) => results,
        Err(err) => {
            warn!(query = %q, error = %err, "GitHub search failed; returning no results");
            Vec::new()
        }
    };

    info!(query = %q, results = results.len(), "Repository search served");
    Ok(Json(results))
}
