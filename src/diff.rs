//! Change detection between a stored snapshot and a freshly fetched one.

use tracing::warn;

use crate::snapshot::{Item, RepositorySnapshot, ValidationError};

/// Outcome of comparing a stored record against its upstream counterpart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub has_changed: bool,
    /// The current snapshot in storage encoding; present only when changed.
    pub repo: Option<Item>,
}

impl DiffResult {
    fn unchanged() -> Self {
        Self {
            has_changed: false,
            repo: None,
        }
    }
}

/// Compares `original` (storage encoding) with `current` by `last_updated`.
///
/// Only a strictly newer upstream timestamp counts as a change. An equal or
/// older one leaves the store untouched so a lagging upstream response cannot
/// roll a record back.
pub fn evaluate(
    original: &Item,
    current: &RepositorySnapshot,
) -> Result<DiffResult, ValidationError> {
    let stored = RepositorySnapshot::from_item(original)?;
    let current_at = current.last_updated_at()?;

    if stored.last_updated == current.last_updated {
        return Ok(DiffResult::unchanged());
    }

    let stored_at = stored.last_updated_at()?;
    if current_at <= stored_at {
        if current_at < stored_at {
            warn!(
                full_name = %current.full_name,
                stored = %stored.last_updated,
                fetched = %current.last_updated,
                "Upstream reported an older last_updated; keeping stored snapshot"
            );
        }
        return Ok(DiffResult::unchanged());
    }

    Ok(DiffResult {
        has_changed: true,
        repo: Some(current.to_item()?),
    })
}
