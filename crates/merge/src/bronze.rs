//! Landing → bronze load: keyed upsert with optional deletion of absent keys.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use fmd_core::{Dataset, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cleansing::{CleansingRegistry, CleansingRule};
use crate::engine::{MergeOutcome, MergeSummary};
use crate::error::{CleansingError, HashError, MergeError};
use crate::hash::{describe_key, non_key_hash, primary_key_hash};
use crate::record::{ChangeRecord, VersionedRecord};
use crate::store::{MergeAction, VersionedTableStore};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BronzeOptions {
    pub primary_keys: Vec<String>,
    /// Incremental loads never remove keys missing from the incoming set.
    #[serde(default)]
    pub is_incremental: bool,
    #[serde(default)]
    pub cleansing_rules: Vec<CleansingRule>,
}

/// Strip spaces from every column name.
pub fn normalize_column_names(rows: Dataset) -> Dataset {
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(k, v)| (k.replace(' ', ""), v))
                .collect::<Row>()
        })
        .collect()
}

/// Hash, cleanse and upsert `rows` into the bronze `table`.
pub fn load_bronze(
    store: &dyn VersionedTableStore,
    registry: &CleansingRegistry,
    table: &str,
    rows: Dataset,
    options: &BronzeOptions,
) -> Result<MergeOutcome, MergeError> {
    load_bronze_at(store, registry, table, rows, options, Utc::now())
}

pub fn load_bronze_at(
    store: &dyn VersionedTableStore,
    registry: &CleansingRegistry,
    table: &str,
    rows: Dataset,
    options: &BronzeOptions,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, MergeError> {
    let keys = &options.primary_keys;
    if keys.is_empty() {
        return Err(HashError::NoKeyColumns.into());
    }
    let rows = normalize_column_names(rows);

    // Keys are validated and hashed before cleansing touches any value.
    let mut seen = HashSet::with_capacity(rows.len());
    let mut key_hashes = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let pk = primary_key_hash(row, keys, i)?;
        if !seen.insert(pk.clone()) {
            return Err(MergeError::DuplicateKey(describe_key(row, keys)));
        }
        key_hashes.push(pk);
    }

    let rows = registry.apply(rows, &options.cleansing_rules)?;
    if rows.len() != key_hashes.len() {
        return Err(CleansingError::FunctionFailed {
            function: "cleansing".into(),
            message: format!("row count changed from {} to {}", key_hashes.len(), rows.len()),
        }
        .into());
    }

    let changes: Vec<ChangeRecord> = rows
        .into_iter()
        .zip(key_hashes)
        .map(|(payload, pk)| ChangeRecord {
            non_key_hash: non_key_hash(&payload, keys),
            primary_key_hash: pk,
            payload,
        })
        .collect();

    if !store.exists(table)? {
        let inserted = changes.len();
        store.create(
            table,
            changes.into_iter().map(|c| VersionedRecord::open(c, now)).collect(),
        )?;
        info!(table, inserted, "bronze table created on first load");
        return Ok(MergeOutcome::Initialized { inserted });
    }

    let current = store.read_current(table)?;
    let (actions, summary) = plan_upsert(&current, changes, options.is_incremental, now);
    if !actions.is_empty() {
        store.apply(table, &actions)?;
    }
    info!(
        table,
        inserted = summary.inserted,
        updated = summary.updated,
        deleted = summary.deleted,
        unchanged = summary.unchanged,
        incremental = options.is_incremental,
        "bronze upsert applied"
    );
    Ok(MergeOutcome::Merged(summary))
}

/// Insert unseen keys, replace changed rows, remove absent keys unless incremental.
pub fn plan_upsert(
    current: &[VersionedRecord],
    changes: Vec<ChangeRecord>,
    is_incremental: bool,
    now: DateTime<Utc>,
) -> (Vec<MergeAction>, MergeSummary) {
    let mut summary = MergeSummary::default();
    let mut actions = Vec::new();
    let by_key: HashMap<&str, &VersionedRecord> = current
        .iter()
        .map(|r| (r.primary_key_hash.as_str(), r))
        .collect();
    let incoming: HashSet<String> = changes.iter().map(|c| c.primary_key_hash.clone()).collect();

    for change in changes {
        match by_key.get(change.primary_key_hash.as_str()) {
            None => {
                actions.push(MergeAction::Insert(VersionedRecord::open(change, now)));
                summary.inserted += 1;
            }
            Some(existing) if existing.non_key_hash != change.non_key_hash => {
                actions.push(MergeAction::Replace(VersionedRecord::open(change, now)));
                summary.updated += 1;
            }
            Some(_) => summary.unchanged += 1,
        }
    }

    if !is_incremental {
        for existing in current {
            if !incoming.contains(&existing.primary_key_hash) {
                actions.push(MergeAction::Remove {
                    primary_key_hash: existing.primary_key_hash.clone(),
                });
                summary.deleted += 1;
            }
        }
    }

    (actions, summary)
}
