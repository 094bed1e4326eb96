//! # Server
//!
//! Router construction, shared state and the long-running `serve` process,
//! which hosts the HTTP API alongside the refresh scheduler and the
//! connection reaper.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::github::{GitHubClient, RepositorySearch};
use crate::handlers::{self, repositories, search, websocket};
use crate::notifications::{LocalHub, transport_from_config};
use crate::repositories::{ConnectionRepository, SnapshotRepository};
use crate::scheduler::{ConnectionReaper, RefreshScheduler};
use crate::telemetry::{TraceContext, with_trace_context};
use crate::workflow::{ConnectionRegistry, Orchestrator, SnapshotStore, SourceFetcher};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared resources available to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub store: Arc<dyn SnapshotStore>,
    pub registry: Arc<dyn ConnectionRegistry>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub search: Arc<dyn RepositorySearch>,
    /// WebSocket sessions connected to this process
    pub hub: Arc<LocalHub>,
}

impl AppState {
    /// Wires the database-backed store and registry and the GitHub client.
    pub fn new(config: Arc<AppConfig>, db: DatabaseConnection) -> anyhow::Result<Self> {
        let shared_db = Arc::new(db.clone());
        let github = Arc::new(
            GitHubClient::new(&config.github).context("failed to build GitHub HTTP client")?,
        );

        Ok(Self {
            store: Arc::new(SnapshotRepository::new(shared_db.clone())),
            registry: Arc::new(ConnectionRepository::new(shared_db)),
            fetcher: github.clone(),
            search: github,
            hub: Arc::new(LocalHub::new()),
            config,
            db,
        })
    }

    /// Builds an orchestrator sharing this state's collaborators.
    pub fn orchestrator(&self) -> anyhow::Result<Orchestrator> {
        let transport = transport_from_config(&self.config.notifications, self.hub.clone())?;
        Ok(Orchestrator::new(
            self.store.clone(),
            self.registry.clone(),
            self.fetcher.clone(),
            transport,
        )
        .configured(&self.config.refresh))
    }
}

/// Scopes each request in a trace context taken from `x-request-id` when present.
async fn request_context(request: Request, next: Next) -> Response {
    let context = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(TraceContext::new)
        .unwrap_or_else(TraceContext::generate);
    let request_id = context.trace_id.clone();

    let mut response = with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Lets browser clients on other origins call the API.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)])
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route(
            "/repositories",
            get(repositories::list_repositories).post(repositories::add_repository),
        )
        .route(
            "/repositories/{owner}/{repo}",
            get(repositories::get_repository).delete(repositories::remove_repository),
        )
        .route("/search", get(search::search_repositories))
        .route("/ws", get(websocket::subscribe))
        .layer(middleware::from_fn(request_context))
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
}

/// Serves the API and runs background loops until `shutdown` fires.
pub async fn run_server(
    config: AppConfig,
    db: DatabaseConnection,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let state = AppState::new(config.clone(), db)?;

    let scheduler = RefreshScheduler::new(
        state.orchestrator()?,
        Duration::from_secs(config.refresh.interval_seconds),
    );
    let reaper = ConnectionReaper::new(
        state.registry.clone(),
        Duration::from_secs(config.notifications.reaper_interval_seconds),
    );
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.child_token()));
    let reaper_task = tokio::spawn(reaper.run(shutdown.child_token()));

    let addr = config
        .bind_addr()
        .with_context(|| format!("invalid bind address {}", config.api_bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, profile = %config.profile, "Server listening");

    let app = create_app(state);
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    shutdown.cancel();
    for (name, task) in [("scheduler", scheduler_task), ("reaper", reaper_task)] {
        if let Err(err) = task.await {
            warn!(task = name, error = %err, "Background task ended abnormally");
        }
    }

    info!("Server stopped");
    Ok(())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::health,
        crate::handlers::repositories::list_repositories,
        crate::handlers::repositories::get_repository,
        crate::handlers::repositories::add_repository,
        crate::handlers::repositories::remove_repository,
        crate::handlers::search::search_repositories,
        crate::handlers::websocket::subscribe,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::snapshot::RepositorySnapshot,
            crate::handlers::repositories::AddRepositoryRequest,
            crate::handlers::repositories::MessageResponse,
            crate::error::ApiError,
        )
    ),
    tags(
        (name = "repositories", description = "Tracked GitHub repositories"),
        (name = "notifications", description = "Change notifications over WebSocket"),
    ),
    info(
        title = "Repo Tracker API",
        description = "Tracks GitHub repositories and notifies subscribers when they change",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
