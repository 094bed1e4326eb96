//! GitHub REST client used to fetch the current state of tracked repositories
//! and to search for new ones.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::config::GitHubConfig;
use crate::snapshot::{RepositorySnapshot, is_valid_full_name};
use crate::workflow::{FetchError, SourceFetcher};

const API_VERSION: &str = "2022-11-28";

/// Subset of `GET /repos/{owner}/{repo}` the tracker keeps.
#[derive(Debug, Deserialize)]
struct GitHubRepository {
    full_name: String,
    description: Option<String>,
    language: Option<String>,
    stargazers_count: u64,
    #[serde(alias = "forks")]
    forks_count: u64,
    #[serde(default)]
    subscribers_count: u64,
    open_issues_count: u64,
    created_at: String,
    updated_at: String,
    owner: Option<GitHubOwner>,
}

#[derive(Debug, Deserialize)]
struct GitHubOwner {
    avatar_url: Option<String>,
}

impl From<GitHubRepository> for RepositorySnapshot {
    fn from(repo: GitHubRepository) -> Self {
        Self {
            full_name: repo.full_name,
            description: repo.description,
            language: repo.language,
            stars: repo.stargazers_count,
            forks: repo.forks_count,
            subscribers_count: repo.subscribers_count,
            open_issues_count: repo.open_issues_count,
            created_at: repo.created_at,
            last_updated: repo.updated_at,
            avatar_url: repo.owner.and_then(|owner| owner.avatar_url),
        }
    }
}

/// Fetches repository metadata from the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: Client,
    api_base: String,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("repo-tracker/", env!("CARGO_PKG_VERSION"))),
        );
        if let Some(token) = config.token.as_deref().filter(|t| !t.is_empty()) {
            if let Ok(mut value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    fn repository_url(&self, full_name: &str) -> String {
        format!("{}/repos/{}", self.api_base, full_name)
    }
}

/// Free-text repository search.
#[async_trait]
pub trait RepositorySearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<RepositorySnapshot>, FetchError>;
}

/// Body of `GET /search/repositories`.
#[derive(Debug, Deserialize)]
struct SearchResponse {
    total_count: u64,
    items: Vec<GitHubRepository>,
}

#[async_trait]
impl SourceFetcher for GitHubClient {
    #[instrument(skip(self), fields(api_base = %self.api_base))]
    async fn fetch(&self, full_name: &str) -> Result<RepositorySnapshot, FetchError> {
        if !is_valid_full_name(full_name) {
            return Err(FetchError::permanent(format!(
                "'{full_name}' is not an owner/repo name"
            )));
        }

        let response = self
            .http
            .get(self.repository_url(full_name))
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        debug!(status = status.as_u16(), "GitHub responded");

        if !status.is_success() {
            return Err(failure_from_response(full_name, response).await);
        }

        let repo: GitHubRepository = response
            .json()
            .await
            .map_err(|e| FetchError::permanent(format!("malformed repository payload: {e}")))?;
        Ok(repo.into())
    }
}

#[async_trait]
impl RepositorySearch for GitHubClient {
    #[instrument(skip(self), fields(api_base = %self.api_base))]
    async fn search(&self, query: &str) -> Result<Vec<RepositorySnapshot>, FetchError> {
        let response = self
            .http
            .get(format!("{}/search/repositories", self.api_base))
            .query(&[("q", query)])
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        debug!(status = status.as_u16(), "GitHub responded");

        if !status.is_success() {
            return Err(failure_from_response(query, response).await);
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| FetchError::permanent(format!("malformed search payload: {e}")))?;
        info!(total_count = body.total_count, "Received search results from GitHub");

        Ok(body.items.into_iter().map(RepositorySnapshot::from).collect())
    }
}

async fn failure_from_response(subject: &str, response: Response) -> FetchError {
    let status = response.status();
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && response
                .headers()
                .get("X-RateLimit-Remaining")
                .and_then(|v| v.to_str().ok())
                == Some("0"));
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.text().await.unwrap_or_default();

    classify_status(subject, status, rate_limited, retry_after, &body)
}

fn classify_status(
    full_name: &str,
    status: StatusCode,
    rate_limited: bool,
    retry_after: Option<String>,
    body: &str,
) -> FetchError {
    let snippet: String = body.chars().take(200).collect();

    if status == StatusCode::NOT_FOUND {
        FetchError::NotFound {
            full_name: full_name.to_string(),
        }
    } else if rate_limited {
        FetchError::transient(match retry_after {
            Some(secs) => format!("rate limited by GitHub (retry after {secs}s)"),
            None => "rate limited by GitHub".to_string(),
        })
    } else if status.is_server_error() || status == StatusCode::FORBIDDEN {
        FetchError::transient(format!("GitHub returned {status}: {snippet}"))
    } else {
        FetchError::permanent(format!("GitHub returned {status}: {snippet}"))
    }
}

fn map_transport_error(err: reqwest::Error) -> FetchError {
    if err.is_builder() {
        FetchError::permanent(format!("invalid GitHub request: {err}"))
    } else {
        FetchError::transient(format!("GitHub request failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_api_payload_to_snapshot() {
        let payload = serde_json::json!({
            "full_name": "octocat/hello-world",
            "description": "My first repository",
            "language": null,
            "stargazers_count": 80,
            "forks_count": 9,
            "subscribers_count": 12,
            "open_issues_count": 0,
            "created_at": "2011-01-26T19:01:12Z",
            "updated_at": "2011-01-26T19:14:43Z",
            "owner": {
                "login": "octocat",
                "avatar_url": "https://github.com/images/error/octocat_happy.gif"
            }
        });

        let repo: GitHubRepository = serde_json::from_value(payload).unwrap();
        let snapshot = RepositorySnapshot::from(repo);

        assert_eq!(snapshot.full_name, "octocat/hello-world");
        assert_eq!(snapshot.stars, 80);
        assert_eq!(snapshot.forks, 9);
        assert_eq!(snapshot.subscribers_count, 12);
        assert_eq!(snapshot.language, None);
        assert_eq!(snapshot.last_updated, "2011-01-26T19:14:43Z");
        assert_eq!(
            snapshot.avatar_url.as_deref(),
            Some("https://github.com/images/error/octocat_happy.gif")
        );
    }

    #[test]
    fn status_classification() {
        let classify = |status: u16, rate_limited: bool| {
            classify_status(
                "acme/widget",
                StatusCode::from_u16(status).unwrap(),
                rate_limited,
                None,
                "",
            )
        };

        assert!(matches!(classify(404, false), FetchError::NotFound { .. }));
        assert!(matches!(classify(429, true), FetchError::Transient { .. }));
        assert!(matches!(classify(403, true), FetchError::Transient { .. }));
        assert!(matches!(classify(403, false), FetchError::Transient { .. }));
        assert!(matches!(classify(502, false), FetchError::Transient { .. }));
        assert!(matches!(classify(401, false), FetchError::Permanent { .. }));
        assert!(matches!(classify(422, false), FetchError::Permanent { .. }));
    }

    #[test]
    fn search_items_without_subscribers_count_decode() {
        let payload = serde_json::json!({
            "total_count": 1,
            "incomplete_results": false,
            "items": [{
                "full_name": "acme/widget",
                "description": null,
                "language": "Rust",
                "stargazers_count": 3,
                "forks_count": 1,
                "open_issues_count": 0,
                "created_at": "2020-01-01T00:00:00Z",
                "updated_at": "2024-01-01T00:00:00Z",
                "owner": null
            }]
        });

        let body: SearchResponse = serde_json::from_value(payload).unwrap();

        assert_eq!(body.total_count, 1);
        let snapshot = RepositorySnapshot::from(body.items.into_iter().next().unwrap());
        assert_eq!(snapshot.subscribers_count, 0);
        assert_eq!(snapshot.avatar_url, None);
    }
}
