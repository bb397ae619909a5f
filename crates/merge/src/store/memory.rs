use std::collections::HashMap;
use std::sync::RwLock;

use super::{apply_actions, MergeAction, VersionedTableStore};
use crate::error::StoreError;
use crate::record::VersionedRecord;

/// In-process store; `apply` holds the write lock for the whole merge.
#[derive(Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, Vec<VersionedRecord>>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

impl VersionedTableStore for MemoryTableStore {
    fn exists(&self, table: &str) -> Result<bool, StoreError> {
        let guard = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.contains_key(table))
    }

    fn read_all(&self, table: &str) -> Result<Vec<VersionedRecord>, StoreError> {
        let guard = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        guard
            .get(table)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn create(&self, table: &str, rows: Vec<VersionedRecord>) -> Result<(), StoreError> {
        let mut guard = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        if guard.contains_key(table) {
            return Err(StoreError::AlreadyExists(table.to_string()));
        }
        guard.insert(table.to_string(), rows);
        Ok(())
    }

    fn apply(&self, table: &str, actions: &[MergeAction]) -> Result<(), StoreError> {
        let mut guard = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        let rows = guard
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
        *rows = apply_actions(rows, actions)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_read() {
        let store = MemoryTableStore::new();
        assert!(!store.exists("t").unwrap());
        store.create("t", Vec::new()).unwrap();
        assert!(store.exists("t").unwrap());
        assert!(store.read_all("t").unwrap().is_empty());
        assert!(matches!(store.create("t", Vec::new()), Err(StoreError::AlreadyExists(_))));
        assert_eq!(store.table_names(), vec!["t"]);
    }

    #[test]
    fn missing_table_errors() {
        let store = MemoryTableStore::new();
        assert!(matches!(store.read_all("nope"), Err(StoreError::TableNotFound(_))));
        assert!(matches!(store.apply("nope", &[]), Err(StoreError::TableNotFound(_))));
    }
}
