//! Global tracing setup and task-scoped correlation ids.
//!
//! Workflow runs and HTTP requests each execute inside a [`TraceContext`] so
//! that errors and log lines can be tied back to the run or request that
//! produced them.

use std::any::type_name_of_val;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::{SubscriberInitExt, TryInitError},
};
use uuid::Uuid;

use crate::config::AppConfig;

/// Correlation id for the unit of work running on the current task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// A context with a freshly generated id.
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Installs the global subscriber once. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    // sqlx and reqwest still log through the `log` facade.
    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!("Warning: log bridge not installed ({err}); `log` records will be dropped.");
        }
    }

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().with_target(true).boxed(),
        _ => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!("Warning: tracing subscriber not installed ({err}); keeping the existing one.");
    }

    Ok(())
}

/// Runs `future` with `context` visible to [`current_trace_id`].
///
/// Task-locals do not cross `tokio::spawn`; spawned work must be scoped again.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}
