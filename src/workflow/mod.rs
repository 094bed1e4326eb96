//! # Refresh Workflow
//!
//! One run walks every stored repository snapshot, fetches its current state
//! upstream, and when the upstream copy is newer persists it and notifies all
//! active subscribers. Repositories are processed as independent branches:
//!
//! ```text
//! Enumerate -> fan-out
//!   -> [ Fetch -> Evaluate -> (Done | Persist -> Notify -> Done) | Failed ]
//!   -> Done
//! ```
//!
//! A failing branch is recorded in the [`RunReport`] and never affects its
//! siblings. Only the initial enumeration can fail a run as a whole.

pub mod ports;
pub mod report;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::RefreshConfig;
use crate::diff::{self, DiffResult};
use crate::notifications::FanOutNotifier;
use crate::retry::RetryPolicy;
use crate::snapshot::{Item, RepositorySnapshot, require_str};
use crate::telemetry::{TraceContext, with_trace_context};

pub use ports::{
    ConnectionRecord, ConnectionRegistry, FetchError, Notification, NotificationTransport,
    SendError, SnapshotStore, SourceFetcher, StoreError,
};
pub use report::{BranchOutcome, BranchReport, BranchStage, RunReport};

const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to enumerate stored repositories: {0}")]
    Enumerate(#[source] StoreError),
}

/// Per-branch state. `Done` and `Failed` are terminal.
enum BranchState {
    Fetch,
    Evaluate(RepositorySnapshot),
    Persist(Item),
    Notify,
    Done(BranchOutcome),
    Failed { stage: BranchStage, error: String },
}

impl BranchState {
    fn stage(&self) -> Option<BranchStage> {
        match self {
            BranchState::Fetch => Some(BranchStage::Fetch),
            BranchState::Evaluate(_) => Some(BranchStage::Evaluate),
            BranchState::Persist(_) => Some(BranchStage::Persist),
            BranchState::Notify => Some(BranchStage::Notify),
            BranchState::Done(_) | BranchState::Failed { .. } => None,
        }
    }

    fn failed(stage: BranchStage, error: impl ToString) -> Self {
        BranchState::Failed {
            stage,
            error: error.to_string(),
        }
    }
}

/// A single repository's pass through the workflow.
struct Branch {
    full_name: String,
    original: Item,
}

impl Branch {
    /// Keeps the tracked key on a fetched snapshot.
    ///
    /// GitHub answers renamed or transferred repositories with the new
    /// `full_name` (the redirect is followed), and casing may differ. The row
    /// stays keyed by the name it was tracked under, so exactly one record
    /// exists per repository.
    fn pin_key(&self, mut current: RepositorySnapshot) -> RepositorySnapshot {
        if current.full_name != self.full_name {
            info!(
                upstream_full_name = %current.full_name,
                "Upstream reports a different full_name; keeping the tracked name"
            );
            current.full_name = self.full_name.clone();
        }
        current
    }
}

/// Drives refresh runs over the configured collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn SnapshotStore>,
    registry: Arc<dyn ConnectionRegistry>,
    fetcher: Arc<dyn SourceFetcher>,
    notifier: FanOutNotifier,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        registry: Arc<dyn ConnectionRegistry>,
        fetcher: Arc<dyn SourceFetcher>,
        transport: Arc<dyn NotificationTransport>,
    ) -> Self {
        Self {
            store,
            registry,
            fetcher,
            notifier: FanOutNotifier::new(transport),
            retry: RetryPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Applies the fetch retry policy and concurrency bound from configuration.
    pub fn configured(self, config: &RefreshConfig) -> Self {
        self.with_retry_policy(config.retry_policy())
            .with_max_concurrency(config.max_concurrency)
    }

    /// Executes one complete run and reports every branch's outcome.
    pub async fn run(&self) -> Result<RunReport, WorkflowError> {
        let context = TraceContext::generate();
        let run_id = context.trace_id.clone();
        let span = info_span!("refresh_run", run_id = %run_id);

        with_trace_context(context, self.execute(run_id).instrument(span)).await
    }

    async fn execute(&self, run_id: String) -> Result<RunReport, WorkflowError> {
        let started = Instant::now();
        let started_at = Utc::now();
        counter!("repo_refresh_runs_total").increment(1);

        let items = self.store.list_all().await.map_err(|err| {
            error!(error = %err, "Could not enumerate stored repositories");
            WorkflowError::Enumerate(err)
        })?;
        info!(repositories = items.len(), "Refresh run started");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut branches = Vec::with_capacity(items.len());
        let mut tasks = JoinSet::new();
        let mut names = HashMap::new();

        for item in items {
            let full_name = match require_str(&item, "full_name") {
                Ok(name) => name.to_string(),
                Err(err) => {
                    warn!(error = %err, "Skipping stored record without a usable full_name");
                    branches.push(BranchReport {
                        full_name: String::new(),
                        outcome: BranchOutcome::Failed {
                            stage: BranchStage::Enumerate,
                            error: err.to_string(),
                        },
                    });
                    continue;
                }
            };

            let orchestrator = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let context = TraceContext::new(run_id.clone());
            let span = info_span!("repository", full_name = %full_name);
            let branch = Branch {
                full_name: full_name.clone(),
                original: item,
            };

            let handle = tasks.spawn(with_trace_context(
                context,
                async move {
                    // The semaphore is never closed, so acquisition only waits.
                    let _permit = semaphore.acquire_owned().await.ok();
                    orchestrator.run_branch(branch).await
                }
                .instrument(span),
            ));
            names.insert(handle.id(), full_name);
        }

        branches.extend(collect_branches(tasks, names).await);

        for branch in &branches {
            counter!("repo_refresh_branches_total", "outcome" => branch.outcome.label())
                .increment(1);
        }
        branches.sort_by(|a, b| a.full_name.cmp(&b.full_name));

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            branches,
        };

        let elapsed = started.elapsed();
        histogram!("repo_refresh_run_duration_ms").record(elapsed.as_secs_f64() * 1_000.0);
        info!(
            unchanged = report.unchanged(),
            updated = report.updated(),
            not_found = report.not_found(),
            failed = report.failed(),
            delivered = report.notifications_delivered(),
            dropped = report.notifications_dropped(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Refresh run finished"
        );

        Ok(report)
    }

    async fn run_branch(&self, branch: Branch) -> BranchReport {
        let mut state = BranchState::Fetch;

        let outcome = loop {
            state = match state {
                BranchState::Done(outcome) => break outcome,
                BranchState::Failed { stage, error } => {
                    warn!(?stage, error = %error, "Branch failed");
                    break BranchOutcome::Failed { stage, error };
                }
                active => {
                    let Some(stage) = active.stage() else {
                        unreachable!("terminal states are handled above");
                    };
                    debug!(?stage, "Entering stage");
                    AssertUnwindSafe(self.step(&branch, active))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| BranchState::failed(stage, "stage panicked"))
                }
            };
        };

        BranchReport {
            full_name: branch.full_name,
            outcome,
        }
    }

    async fn step(&self, branch: &Branch, state: BranchState) -> BranchState {
        match state {
            BranchState::Fetch => {
                let fetched = self
                    .retry
                    .retry(|attempt| {
                        debug!(attempt, "Fetching upstream repository");
                        self.fetcher.fetch(&branch.full_name)
                    })
                    .await;

                match fetched {
                    Ok(current) => BranchState::Evaluate(branch.pin_key(current)),
                    Err(FetchError::NotFound { .. }) => {
                        info!("Repository not found upstream; leaving stored snapshot as is");
                        BranchState::Done(BranchOutcome::NotFound)
                    }
                    Err(err) => BranchState::failed(BranchStage::Fetch, err),
                }
            }

            BranchState::Evaluate(current) => match diff::evaluate(&branch.original, &current) {
                Ok(DiffResult {
                    has_changed: true,
                    repo: Some(item),
                }) => BranchState::Persist(item),
                Ok(_) => BranchState::Done(BranchOutcome::Unchanged),
                Err(err) => BranchState::failed(BranchStage::Evaluate, err),
            },

            BranchState::Persist(item) => match self.store.upsert(&branch.full_name, &item).await {
                Ok(()) => BranchState::Notify,
                Err(err) => BranchState::failed(BranchStage::Persist, err),
            },

            BranchState::Notify => {
                let now = Utc::now().timestamp();
                match self.registry.list_active(now).await {
                    Ok(connections) => {
                        let summary = self
                            .notifier
                            .broadcast(
                                connections,
                                Notification::repository_changed(branch.full_name.as_str()),
                            )
                            .await;
                        info!(
                            delivered = summary.delivered,
                            dropped = summary.dropped(),
                            "Repository updated and subscribers notified"
                        );
                        BranchState::Done(BranchOutcome::Updated {
                            delivered: summary.delivered,
                            dropped: summary.dropped(),
                        })
                    }
                    Err(err) => BranchState::failed(BranchStage::Notify, err),
                }
            }

            terminal @ (BranchState::Done(_) | BranchState::Failed { .. }) => terminal,
        }
    }
}

/// Joins every branch task. A task that ends without a report (cancelled, or
/// panicked outside a stage) is recorded as failed so the report keeps one
/// entry per enumerated repository.
async fn collect_branches(
    mut tasks: JoinSet<BranchReport>,
    mut names: HashMap<task::Id, String>,
) -> Vec<BranchReport> {
    let mut branches = Vec::with_capacity(tasks.len());

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(report) => branches.push(report),
            Err(err) => {
                let full_name = names.remove(&err.id()).unwrap_or_default();
                error!(%full_name, error = %err, "Branch task ended without a report");
                // No stage was reported; Fetch is where every branch starts.
                branches.push(BranchReport {
                    full_name,
                    outcome: BranchOutcome::Failed {
                        stage: BranchStage::Fetch,
                        error: format!("branch task ended abnormally: {err}"),
                    },
                });
            }
        }
    }

    branches
}
