use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::{apply_actions, validate_table_name, MergeAction, VersionedTableStore};
use crate::error::StoreError;
use crate::record::VersionedRecord;

/// One JSON file per table under `root`; `ns/name` maps to `root/ns/name.json`.
///
/// Writes go to a dot-prefixed `.tmp` sibling first and are renamed into
/// place, so readers never observe a half-written table.
pub struct FileTableStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> Result<PathBuf, StoreError> {
        validate_table_name(table)?;
        Ok(self.root.join(format!("{table}.json")))
    }

    fn read_file(&self, path: &Path, table: &str) -> Result<Vec<VersionedRecord>, StoreError> {
        if !path.exists() {
            return Err(StoreError::TableNotFound(table.to_string()));
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_file(&self, path: &Path, rows: &[VersionedRecord]) -> Result<(), StoreError> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = dir.join(format!(".{file_name}.tmp"));
        let json = serde_json::to_string_pretty(rows)?;
        fs::write(&tmp_path, json)?;
        fs::rename(&tmp_path, path)?;
        debug!(path = %path.display(), rows = rows.len(), "table written");
        Ok(())
    }
}

impl VersionedTableStore for FileTableStore {
    fn exists(&self, table: &str) -> Result<bool, StoreError> {
        Ok(self.table_path(table)?.exists())
    }

    fn read_all(&self, table: &str) -> Result<Vec<VersionedRecord>, StoreError> {
        let path = self.table_path(table)?;
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        self.read_file(&path, table)
    }

    fn create(&self, table: &str, rows: Vec<VersionedRecord>) -> Result<(), StoreError> {
        let path = self.table_path(table)?;
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        if path.exists() {
            return Err(StoreError::AlreadyExists(table.to_string()));
        }
        self.write_file(&path, &rows)
    }

    fn apply(&self, table: &str, actions: &[MergeAction]) -> Result<(), StoreError> {
        let path = self.table_path(table)?;
        let _guard = self.lock.lock().map_err(|_| StoreError::Poisoned)?;
        let rows = self.read_file(&path, table)?;
        let next = apply_actions(&rows, actions)?;
        self.write_file(&path, &next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ChangeRecord;
    use chrono::Utc;
    use fmd_core::{FieldValue, Row};
    use tempfile::TempDir;

    fn record(pk: &str) -> VersionedRecord {
        let mut payload = Row::new();
        payload.insert("Name".into(), FieldValue::Text(pk.to_lowercase()));
        VersionedRecord::open(
            ChangeRecord {
                primary_key_hash: pk.into(),
                non_key_hash: "h".into(),
                payload,
            },
            Utc::now(),
        )
    }

    #[test]
    fn persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let store = FileTableStore::new(tmp.path()).unwrap();
        let a = record("A");
        store.create("erp/silver_orders", vec![a.clone()]).unwrap();
        assert!(tmp.path().join("erp").join("silver_orders.json").exists());

        let reopened = FileTableStore::new(tmp.path()).unwrap();
        assert_eq!(reopened.read_all("erp/silver_orders").unwrap(), vec![a]);
        assert!(reopened.exists("erp/silver_orders").unwrap());
    }

    #[test]
    fn apply_rewrites_atomically_and_leaves_no_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = FileTableStore::new(tmp.path()).unwrap();
        store.create("t", vec![record("A")]).unwrap();
        store.apply("t", &[MergeAction::Insert(record("B"))]).unwrap();

        assert_eq!(store.read_all("t").unwrap().len(), 2);
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_apply_keeps_previous_contents() {
        let tmp = TempDir::new().unwrap();
        let store = FileTableStore::new(tmp.path()).unwrap();
        let a = record("A");
        store.create("t", vec![a.clone()]).unwrap();
        let err = store.apply(
            "t",
            &[
                MergeAction::Insert(record("B")),
                MergeAction::Remove { primary_key_hash: "A".into() },
                MergeAction::Close {
                    primary_key_hash: "A".into(),
                    record_start_date: a.record_start_date,
                    record_end_date: Utc::now(),
                },
            ],
        );
        assert!(matches!(err, Err(StoreError::Conflict(_))));
        assert_eq!(store.read_all("t").unwrap(), vec![a]);
    }

    #[test]
    fn rejects_escaping_names() {
        let tmp = TempDir::new().unwrap();
        let store = FileTableStore::new(tmp.path()).unwrap();
        assert!(matches!(store.exists("../x"), Err(StoreError::InvalidTable(_))));
    }
}
