//! Data-quality cleansing: named functions applied to a dataset by rule.
//!
//! Rules arrive as JSON, e.g.
//! `[{"function": "to_upper", "columns": "Name;City", "parameters": {}}]`,
//! and are resolved against a [`CleansingRegistry`] populated at startup.

mod builtins;

use std::collections::HashMap;
use std::sync::Arc;

use fmd_core::Dataset;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::CleansingError;

pub type Params = Map<String, Value>;

/// `(dataset, columns, parameters) -> dataset`; errors are plain messages.
pub type CleansingFn = Arc<dyn Fn(Dataset, &[String], &Params) -> Result<Dataset, String> + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleansingRule {
    #[serde(default)]
    pub function: Option<String>,
    /// `;`-separated column list.
    #[serde(default)]
    pub columns: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
}

impl CleansingRule {
    pub fn column_list(&self) -> Vec<String> {
        self.columns
            .as_deref()
            .unwrap_or_default()
            .split(';')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(String::from)
            .collect()
    }

    fn params(&self) -> Result<Params, CleansingError> {
        match &self.parameters {
            None | Some(Value::Null) => Ok(Params::new()),
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(other) => Err(CleansingError::InvalidRules(format!(
                "parameters must be an object, got {other}"
            ))),
        }
    }
}

/// Parse a rule list; blank input means no rules.
pub fn parse_rules(raw: &str) -> Result<Vec<CleansingRule>, CleansingError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|e| CleansingError::InvalidRules(e.to_string()))
}

#[derive(Clone, Default)]
pub struct CleansingRegistry {
    functions: HashMap<String, CleansingFn>,
}

impl CleansingRegistry {
    /// Registry without any functions.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with `normalize_text`, `fill_nulls`, `parse_datetime`, `to_upper`, `to_lower`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtins::register_all(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Dataset, &[String], &Params) -> Result<Dataset, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Run a single named function.
    pub fn call(
        &self,
        name: &str,
        dataset: Dataset,
        columns: &[String],
        params: &Params,
    ) -> Result<Dataset, CleansingError> {
        let f = self
            .functions
            .get(name)
            .ok_or_else(|| CleansingError::UnknownFunction(name.to_string()))?;
        f(dataset, columns, params).map_err(|message| CleansingError::FunctionFailed {
            function: name.to_string(),
            message,
        })
    }

    /// Apply rules in order. Rules without a function name are skipped.
    pub fn apply(&self, mut dataset: Dataset, rules: &[CleansingRule]) -> Result<Dataset, CleansingError> {
        for rule in rules {
            let Some(function) = rule.function.as_deref() else {
                warn!(?rule, "cleansing rule has no function, skipping");
                continue;
            };
            let columns = rule.column_list();
            debug!(function, ?columns, "applying cleansing rule");
            dataset = self.call(function, dataset, &columns, &rule.params()?)?;
        }
        Ok(dataset)
    }
}

impl std::fmt::Debug for CleansingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleansingRegistry")
            .field("functions", &self.names())
            .finish()
    }
}
