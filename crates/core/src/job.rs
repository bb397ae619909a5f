use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Opaque parameter map forwarded verbatim to the execution backend.
pub type JobParams = IndexMap<String, String>;

/// Jobs sharing a group key write the same target table and must run in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupKey {
    pub namespace: String,
    pub target_schema: String,
    pub target_table: String,
}

impl GroupKey {
    pub fn new(
        namespace: impl Into<String>,
        target_schema: impl Into<String>,
        target_table: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            target_schema: target_schema.into(),
            target_table: target_table.into(),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}.{}", self.namespace, self.target_schema, self.target_table)
    }
}

/// One entity job: copy/transform one source table or file into one target table.
///
/// Built from a catalog entry and never mutated once it has been planned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub group_key: GroupKey,
    #[serde(default)]
    pub source_file_name: Option<String>,
    #[serde(default)]
    pub params: JobParams,
}

impl Job {
    pub fn new(id: impl Into<String>, group_key: GroupKey) -> Self {
        Self {
            id: id.into(),
            group_key,
            source_file_name: None,
            params: JobParams::new(),
        }
    }

    pub fn with_source_file(mut self, name: impl Into<String>) -> Self {
        self.source_file_name = Some(name.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }
}

/// Flat catalog export row, the format accepted in job manifests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub id: String,
    pub namespace: String,
    pub target_schema: String,
    pub target_name: String,
    #[serde(default)]
    pub source_file_name: Option<String>,
    #[serde(default)]
    pub params: JobParams,
}

impl From<CatalogEntry> for Job {
    fn from(entry: CatalogEntry) -> Self {
        let mut params = entry.params;
        params
            .entry("DataSourceNamespace".to_string())
            .or_insert_with(|| entry.namespace.clone());
        params
            .entry("TargetSchema".to_string())
            .or_insert_with(|| entry.target_schema.clone());
        params
            .entry("TargetName".to_string())
            .or_insert_with(|| entry.target_name.clone());
        if let Some(name) = &entry.source_file_name {
            params
                .entry("SourceFileName".to_string())
                .or_insert_with(|| name.clone());
        }
        Self {
            id: entry.id,
            group_key: GroupKey::new(entry.namespace, entry.target_schema, entry.target_name),
            source_file_name: entry.source_file_name,
            params,
        }
    }
}

/// Parse a JSON job manifest (array of catalog entries).
pub fn parse_manifest(json: &str) -> Result<Vec<Job>, crate::FmdError> {
    let entries: Vec<CatalogEntry> = serde_json::from_str(json)?;
    let mut seen = std::collections::HashSet::new();
    for entry in &entries {
        if entry.id.is_empty() {
            return Err(crate::FmdError::InvalidJob("job with empty id".into()));
        }
        if !seen.insert(entry.id.clone()) {
            return Err(crate::FmdError::InvalidJob(format!("duplicate job id: {}", entry.id)));
        }
    }
    Ok(entries.into_iter().map(Job::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_entries_become_jobs() {
        let json = r#"[
            {"id": "j1", "namespace": "erp", "targetSchema": "sales", "targetName": "orders",
             "sourceFileName": "orders_202601311402.json", "params": {"PrimaryKeys": "OrderId"}}
        ]"#;
        let jobs = parse_manifest(json).unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.group_key, GroupKey::new("erp", "sales", "orders"));
        assert_eq!(job.param("PrimaryKeys"), Some("OrderId"));
        assert_eq!(job.param("TargetName"), Some("orders"));
        assert_eq!(job.param("SourceFileName"), Some("orders_202601311402.json"));
    }

    #[test]
    fn manifest_rejects_duplicate_ids() {
        let json = r#"[
            {"id": "j1", "namespace": "a", "targetSchema": "b", "targetName": "c"},
            {"id": "j1", "namespace": "a", "targetSchema": "b", "targetName": "d"}
        ]"#;
        let err = parse_manifest(json).unwrap_err();
        assert!(err.to_string().contains("duplicate job id"));
    }

    #[test]
    fn empty_param_reads_as_missing() {
        let job = Job::new("j", GroupKey::new("a", "b", "c")).with_param("X", "");
        assert_eq!(job.param("X"), None);
    }

    #[test]
    fn group_key_display() {
        assert_eq!(GroupKey::new("erp", "sales", "orders").to_string(), "erp/sales.orders");
    }
}
