//! SCD Type 2 merge engine.
//!
//! Incoming change records are diffed against the target's current rows per
//! primary-key digest. Every outcome set is computed first and then handed to
//! the store as one atomic conditional merge. All timestamps written by one
//! merge come from a single clock reading.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::MergeError;
use crate::record::{ChangeRecord, VersionedRecord};
use crate::store::{MergeAction, VersionedTableStore};

/// Per-merge counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// Tagged result of a merge invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Target did not exist; it was created from the change-set.
    Initialized { inserted: usize },
    Merged(MergeSummary),
}

impl MergeOutcome {
    pub fn rows_written(&self) -> usize {
        match self {
            MergeOutcome::Initialized { inserted } => *inserted,
            MergeOutcome::Merged(s) => s.inserted + s.updated + s.deleted,
        }
    }
}

/// Reject change-sets carrying the same primary key twice.
pub(crate) fn ensure_unique(changes: &[ChangeRecord]) -> Result<(), MergeError> {
    let mut seen = HashSet::with_capacity(changes.len());
    for c in changes {
        if !seen.insert(c.primary_key_hash.as_str()) {
            return Err(MergeError::DuplicateKey(c.primary_key_hash.clone()));
        }
    }
    Ok(())
}

/// Compute the actions that bring `current` in line with `changes` at `now`.
///
/// `current` holds the target's `IsCurrent` rows. An empty change-set yields
/// no actions.
pub fn plan_scd2(
    current: &[VersionedRecord],
    changes: &[ChangeRecord],
    now: DateTime<Utc>,
) -> (Vec<MergeAction>, MergeSummary) {
    let mut summary = MergeSummary::default();
    let mut actions = Vec::new();

    if changes.is_empty() {
        summary.unchanged = current.iter().filter(|r| r.is_live()).count();
        return (actions, summary);
    }

    let by_key: HashMap<&str, &VersionedRecord> = current
        .iter()
        .map(|r| (r.primary_key_hash.as_str(), r))
        .collect();
    let close = |r: &VersionedRecord| MergeAction::Close {
        primary_key_hash: r.primary_key_hash.clone(),
        record_start_date: r.record_start_date,
        record_end_date: now,
    };

    for change in changes {
        match by_key.get(change.primary_key_hash.as_str()) {
            None => {
                actions.push(MergeAction::Insert(VersionedRecord::open(change.clone(), now)));
                summary.inserted += 1;
            }
            Some(existing) if existing.is_deleted => {
                // Reappearing key: end the deletion marker, open a fresh version.
                actions.push(close(existing));
                actions.push(MergeAction::Insert(VersionedRecord::open(change.clone(), now)));
                summary.inserted += 1;
            }
            Some(existing) if existing.non_key_hash != change.non_key_hash => {
                actions.push(close(existing));
                actions.push(MergeAction::Insert(VersionedRecord::open(change.clone(), now)));
                summary.updated += 1;
            }
            Some(_) => summary.unchanged += 1,
        }
    }

    let incoming: HashSet<&str> = changes.iter().map(|c| c.primary_key_hash.as_str()).collect();
    for existing in current {
        if existing.is_deleted || incoming.contains(existing.primary_key_hash.as_str()) {
            continue;
        }
        actions.push(close(existing));
        actions.push(MergeAction::Insert(VersionedRecord::tombstone(existing, now)));
        summary.deleted += 1;
    }

    (actions, summary)
}

/// Merge `changes` into `table`, creating it on first load.
pub fn merge(
    store: &dyn VersionedTableStore,
    table: &str,
    changes: Vec<ChangeRecord>,
) -> Result<MergeOutcome, MergeError> {
    merge_at(store, table, changes, Utc::now())
}

/// [`merge`] with an explicit clock reading.
pub fn merge_at(
    store: &dyn VersionedTableStore,
    table: &str,
    changes: Vec<ChangeRecord>,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, MergeError> {
    ensure_unique(&changes)?;

    if !store.exists(table)? {
        let inserted = changes.len();
        let rows = changes
            .into_iter()
            .map(|c| VersionedRecord::open(c, now))
            .collect();
        store.create(table, rows)?;
        info!(table, inserted, "target created on first load");
        return Ok(MergeOutcome::Initialized { inserted });
    }

    if changes.is_empty() {
        warn!(table, "empty change-set, target left unchanged");
    }

    let current = store.read_current(table)?;
    let (actions, summary) = plan_scd2(&current, &changes, now);
    if !actions.is_empty() {
        store.apply(table, &actions)?;
    }
    info!(
        table,
        inserted = summary.inserted,
        updated = summary.updated,
        deleted = summary.deleted,
        unchanged = summary.unchanged,
        "scd2 merge applied"
    );
    Ok(MergeOutcome::Merged(summary))
}
