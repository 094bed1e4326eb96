//! # Repo Tracker Entry Point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use repo_tracker::{
    config::ConfigLoader,
    db,
    server::{AppState, run_server},
    telemetry::init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "repo-tracker")]
#[command(about = "Track GitHub repositories and notify subscribers of changes", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory containing the layered `.env` files
    #[arg(long, global = true)]
    env_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API and run scheduled refreshes (default)
    Serve,
    /// Execute a single refresh run and print its report as JSON
    RunOnce,
    /// Apply pending database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loader = match cli.env_dir {
        Some(dir) => ConfigLoader::with_base_dir(dir),
        None => ConfigLoader::new(),
    };
    let config = loader.load().context("loading configuration")?;
    init_tracing(&config)?;

    info!(profile = %config.profile, "Configuration loaded");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::migrate(&db).await?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!(error = %err, "Failed to listen for shutdown signal");
                    return;
                }
                info!("Shutdown signal received");
                signal_token.cancel();
            });
            run_server(config, db, shutdown).await
        }
        Commands::RunOnce => {
            let state = AppState::new(Arc::new(config), db)?;
            let report = state.orchestrator()?.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Migrate => {
            info!("Migrations applied");
            Ok(())
        }
    }
}
