//! Versioned table stores.
//!
//! A store exposes snapshot reads and one atomic conditional-merge primitive,
//! [`VersionedTableStore::apply`]: either every action lands or none does.

mod file;
mod memory;

pub use file::FileTableStore;
pub use memory::MemoryTableStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::record::VersionedRecord;

/// One step of a conditional merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MergeAction {
    /// Update-if-matched on (primary key, start date) while still current.
    Close {
        primary_key_hash: String,
        record_start_date: DateTime<Utc>,
        record_end_date: DateTime<Utc>,
    },
    /// Insert on (primary key, start date); an existing row is a conflict.
    Insert(VersionedRecord),
    /// Overwrite the single row held for this primary key (upsert tables).
    Replace(VersionedRecord),
    /// Drop every row held for this primary key (upsert tables).
    Remove { primary_key_hash: String },
}

pub trait VersionedTableStore: Send + Sync {
    fn exists(&self, table: &str) -> Result<bool, StoreError>;

    /// Every row, history included.
    fn read_all(&self, table: &str) -> Result<Vec<VersionedRecord>, StoreError>;

    /// Rows with `IsCurrent = true`.
    fn read_current(&self, table: &str) -> Result<Vec<VersionedRecord>, StoreError> {
        Ok(self
            .read_all(table)?
            .into_iter()
            .filter(|r| r.is_current)
            .collect())
    }

    /// Create a table holding `rows`. Fails if it already exists.
    fn create(&self, table: &str, rows: Vec<VersionedRecord>) -> Result<(), StoreError>;

    /// Apply `actions` atomically.
    fn apply(&self, table: &str, actions: &[MergeAction]) -> Result<(), StoreError>;
}

/// Layer table name: `{namespace}/{schema}_{name}`.
pub fn qualified_table_name(namespace: &str, schema: &str, name: &str) -> String {
    format!("{namespace}/{schema}_{name}")
}

/// Apply actions to an in-memory copy; the caller swaps it in on success.
pub(crate) fn apply_actions(
    rows: &[VersionedRecord],
    actions: &[MergeAction],
) -> Result<Vec<VersionedRecord>, StoreError> {
    let mut next = rows.to_vec();
    for action in actions {
        match action {
            MergeAction::Close {
                primary_key_hash,
                record_start_date,
                record_end_date,
            } => {
                let row = next
                    .iter_mut()
                    .find(|r| {
                        r.is_current
                            && &r.primary_key_hash == primary_key_hash
                            && &r.record_start_date == record_start_date
                    })
                    .ok_or_else(|| {
                        StoreError::Conflict(format!(
                            "no current row for key {primary_key_hash} starting {record_start_date}"
                        ))
                    })?;
                row.is_current = false;
                row.record_end_date = *record_end_date;
                row.record_modified_date = *record_end_date;
            }
            MergeAction::Insert(record) => {
                let present = next.iter().any(|r| {
                    r.primary_key_hash == record.primary_key_hash
                        && r.record_start_date == record.record_start_date
                });
                if present {
                    return Err(StoreError::Conflict(format!(
                        "row for key {} starting {} already present",
                        record.primary_key_hash, record.record_start_date
                    )));
                }
                next.push(record.clone());
            }
            MergeAction::Replace(record) => {
                match next
                    .iter_mut()
                    .find(|r| r.primary_key_hash == record.primary_key_hash)
                {
                    Some(row) => *row = record.clone(),
                    None => next.push(record.clone()),
                }
            }
            MergeAction::Remove { primary_key_hash } => {
                next.retain(|r| &r.primary_key_hash != primary_key_hash);
            }
        }
    }
    Ok(next)
}

/// Reject names that could escape a store's root directory.
pub(crate) fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let bad = table.is_empty()
        || table.starts_with('/')
        || table.contains('\\')
        || table.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StoreError::InvalidTable(table.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{end_of_time, ChangeRecord};
    use chrono::Duration;
    use fmd_core::Row;

    fn rec(pk: &str, start: DateTime<Utc>) -> VersionedRecord {
        VersionedRecord::open(
            ChangeRecord {
                primary_key_hash: pk.into(),
                non_key_hash: "h".into(),
                payload: Row::new(),
            },
            start,
        )
    }

    #[test]
    fn close_requires_matching_current_row() {
        let t0 = Utc::now();
        let rows = vec![rec("a", t0)];
        let t1 = t0 + Duration::seconds(1);

        let closed = apply_actions(
            &rows,
            &[MergeAction::Close {
                primary_key_hash: "a".into(),
                record_start_date: t0,
                record_end_date: t1,
            }],
        )
        .unwrap();
        assert!(!closed[0].is_current);
        assert_eq!(closed[0].record_end_date, t1);

        let err = apply_actions(
            &closed,
            &[MergeAction::Close {
                primary_key_hash: "a".into(),
                record_start_date: t0,
                record_end_date: t1,
            }],
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn insert_collision_is_a_conflict() {
        let t0 = Utc::now();
        let rows = vec![rec("a", t0)];
        let err = apply_actions(&rows, &[MergeAction::Insert(rec("a", t0))]).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let next = apply_actions(&rows, &[MergeAction::Insert(rec("b", t0))]).unwrap();
        assert_eq!(next.len(), 2);
        let later = apply_actions(&rows, &[MergeAction::Insert(rec("a", t0 + Duration::seconds(1)))]).unwrap();
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn failed_action_leaves_input_untouched() {
        let t0 = Utc::now();
        let rows = vec![rec("a", t0)];
        let res = apply_actions(
            &rows,
            &[
                MergeAction::Insert(rec("b", t0)),
                MergeAction::Close {
                    primary_key_hash: "missing".into(),
                    record_start_date: t0,
                    record_end_date: t0,
                },
            ],
        );
        assert!(res.is_err());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_end_date, end_of_time());
    }

    #[test]
    fn replace_and_remove_key_on_primary_key() {
        let t0 = Utc::now();
        let rows = vec![rec("a", t0), rec("b", t0)];
        let mut changed = rec("a", t0 + Duration::seconds(5));
        changed.non_key_hash = "h2".into();
        let next = apply_actions(
            &rows,
            &[
                MergeAction::Replace(changed.clone()),
                MergeAction::Remove { primary_key_hash: "b".into() },
            ],
        )
        .unwrap();
        assert_eq!(next, vec![changed]);
    }

    #[test]
    fn table_names_cannot_escape_root() {
        assert!(validate_table_name("erp/bronze_orders").is_ok());
        assert!(validate_table_name("../etc").is_err());
        assert!(validate_table_name("/abs").is_err());
        assert!(validate_table_name("a//b").is_err());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name(&qualified_table_name("erp", "sales", "orders")).is_ok());
        assert_eq!(qualified_table_name("erp", "sales", "orders"), "erp/sales_orders");
    }
}
