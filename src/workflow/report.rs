//! Per-run results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Where in the per-repository pipeline a branch stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BranchStage {
    Enumerate,
    Fetch,
    Evaluate,
    Persist,
    Notify,
}

/// Terminal state of one repository branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BranchOutcome {
    Unchanged,
    /// The repository no longer exists upstream; the stored record is kept
    NotFound,
    Updated {
        delivered: usize,
        dropped: usize,
    },
    Failed {
        stage: BranchStage,
        error: String,
    },
}

impl BranchOutcome {
    /// Metric label for this outcome.
    pub fn label(&self) -> &'static str {
        match self {
            BranchOutcome::Unchanged => "unchanged",
            BranchOutcome::NotFound => "not_found",
            BranchOutcome::Updated { .. } => "updated",
            BranchOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BranchReport {
    pub full_name: String,
    pub outcome: BranchOutcome,
}

/// Summary of one workflow execution.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub branches: Vec<BranchReport>,
}

impl RunReport {
    fn count(&self, label: &str) -> usize {
        self.branches
            .iter()
            .filter(|b| b.outcome.label() == label)
            .count()
    }

    pub fn unchanged(&self) -> usize {
        self.count("unchanged")
    }

    pub fn not_found(&self) -> usize {
        self.count("not_found")
    }

    pub fn updated(&self) -> usize {
        self.count("updated")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn notifications_delivered(&self) -> usize {
        self.branches
            .iter()
            .map(|b| match b.outcome {
                BranchOutcome::Updated { delivered, .. } => delivered,
                _ => 0,
            })
            .sum()
    }

    /// Sends that were swallowed as gone or failed.
    pub fn notifications_dropped(&self) -> usize {
        self.branches
            .iter()
            .map(|b| match b.outcome {
                BranchOutcome::Updated { dropped, .. } => dropped,
                _ => 0,
            })
            .sum()
    }

    pub fn outcome_of(&self, full_name: &str) -> Option<&BranchOutcome> {
        self.branches
            .iter()
            .find(|b| b.full_name == full_name)
            .map(|b| &b.outcome)
    }
}
