//! Batch planner: packs ordered jobs into concurrency-bounded batches.
//!
//! A batch never splits a group. The first batch's capacity is raised to fit
//! the largest group; later batches revert to `max_concurrency` unless a
//! single oversized group opens them. Inside a batch every non-first member
//! of a group depends on the previous member, so unrelated jobs run
//! concurrently while each target table is written strictly in order.
//!
//! Planning is purely structural: no I/O, deterministic in its inputs.

use std::collections::HashMap;
use std::time::Duration;

use fmd_core::config::SchedulerSettings;
use fmd_core::{GroupKey, Job};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ordering::PlannedJob;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("max_concurrency must be at least 1")]
    ZeroConcurrency,
}

/// Planner limits and per-activity defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Ceiling imposed by the backend's batch-run primitive.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default)]
    pub retry_interval_secs: u64,
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout_secs: u64,
}

fn default_max_concurrency() -> usize { 50 }
fn default_step_timeout() -> u64 { 600 }
fn default_retry_count() -> u32 { 2 }
fn default_batch_timeout() -> u64 { 7200 }

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            step_timeout_secs: default_step_timeout(),
            retry_count: default_retry_count(),
            retry_interval_secs: 0,
            batch_timeout_secs: default_batch_timeout(),
        }
    }
}

impl From<&SchedulerSettings> for PlannerConfig {
    fn from(s: &SchedulerSettings) -> Self {
        Self {
            max_concurrency: s.max_concurrency,
            step_timeout_secs: s.step_timeout_secs,
            retry_count: s.retry_count,
            retry_interval_secs: s.retry_interval_secs,
            batch_timeout_secs: s.batch_timeout_secs,
        }
    }
}

/// One schedulable unit inside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct Activity {
    /// Unique within the run: `{source}_{table}_{batch}_{position}`.
    pub name: String,
    pub job: Job,
    pub order_index: usize,
    pub timeout_per_step: Duration,
    pub retry_count: u32,
    pub retry_interval: Duration,
    /// Previous member of the same group within this batch.
    pub depends_on: Option<String>,
}

impl Activity {
    pub fn group_key(&self) -> &GroupKey {
        &self.job.group_key
    }
}

/// A concurrency-bounded set of activities dispatched together.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    pub index: usize,
    pub activities: Vec<Activity>,
    pub timeout: Duration,
    /// Number of activities the backend may run at once.
    pub concurrency: usize,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    /// Intra-batch dependency map: activity -> activity it waits for.
    pub fn dependencies(&self) -> IndexMap<&str, &str> {
        self.activities
            .iter()
            .filter_map(|a| a.depends_on.as_deref().map(|d| (a.name.as_str(), d)))
            .collect()
    }
}

/// Derive the readable prefix of an activity name from its target.
fn activity_prefix(key: &GroupKey) -> String {
    let source = key.target_schema.split('/').next().unwrap_or_default();
    let table: String = key.target_table.split('_').take(2).collect();
    format!("{source}_{table}")
}

/// Packs ordered jobs into batches.
pub struct BatchPlanner {
    config: PlannerConfig,
}

impl BatchPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan batches for jobs already passed through [`crate::order_jobs`].
    pub fn plan(&self, ordered: &[PlannedJob]) -> Result<Vec<Batch>, PlanError> {
        let max = self.config.max_concurrency;
        if max == 0 {
            return Err(PlanError::ZeroConcurrency);
        }

        // Coalesce by group so a group is always one contiguous segment.
        let mut segments: IndexMap<&GroupKey, Vec<&PlannedJob>> = IndexMap::new();
        for pj in ordered {
            segments.entry(pj.group_key()).or_default().push(pj);
        }

        let largest = segments.values().map(Vec::len).max().unwrap_or(0);
        if largest > max {
            warn!(
                largest_group = largest,
                max_concurrency = max,
                "largest group exceeds max concurrency, first batch capacity raised"
            );
        }

        let mut packed: Vec<Vec<&PlannedJob>> = Vec::new();
        let mut current: Vec<&PlannedJob> = Vec::new();
        let mut capacity = max.max(largest);

        for (key, members) in segments {
            if !current.is_empty() && current.len() + members.len() > capacity {
                packed.push(std::mem::take(&mut current));
                capacity = max;
            }
            if current.is_empty() && members.len() > capacity {
                warn!(group = %key, size = members.len(), "oversized group gets a dedicated batch");
                capacity = members.len();
            }
            current.extend(members);
        }
        if !current.is_empty() {
            packed.push(current);
        }

        let batches: Vec<Batch> = packed
            .into_iter()
            .enumerate()
            .map(|(n, members)| self.build_batch(n, members))
            .collect();

        info!(
            jobs = ordered.len(),
            batches = batches.len(),
            max_concurrency = max,
            "batch plan built"
        );
        Ok(batches)
    }

    fn build_batch(&self, index: usize, members: Vec<&PlannedJob>) -> Batch {
        let mut last_by_group: HashMap<&GroupKey, String> = HashMap::new();
        let mut activities = Vec::with_capacity(members.len());

        for (position, pj) in members.into_iter().enumerate() {
            let name = format!("{}_{}_{}", activity_prefix(pj.group_key()), index, position);
            let depends_on = last_by_group.insert(pj.group_key(), name.clone());
            activities.push(Activity {
                name,
                job: pj.job.clone(),
                order_index: pj.order_index,
                timeout_per_step: Duration::from_secs(self.config.step_timeout_secs),
                retry_count: self.config.retry_count,
                retry_interval: Duration::from_secs(self.config.retry_interval_secs),
                depends_on,
            });
        }

        Batch {
            index,
            concurrency: activities.len(),
            activities,
            timeout: Duration::from_secs(self.config.batch_timeout_secs),
        }
    }
}
