//! Execution backend contract.
//!
//! The backend runs one batch at a time, honoring `depends_on`, retries and
//! timeouts. Its answer is a tagged [`BatchOutcome`] so the executor can tell
//! a partial failure (results available) from a hard failure (nothing known).

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::planner::Batch;

/// Exception marker the backend reports for a successful activity.
pub const SUCCESS_SENTINEL: &str = "None";

/// Per-activity result keyed by activity name, in completion order.
pub type ResultMap = IndexMap<String, ActivityResult>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityResult {
    pub activity_name: String,
    /// Whatever the job handed back on exit.
    pub exit_value: serde_json::Value,
    /// `None` or the sentinel `"None"` means success; any other text is the failure.
    pub exception: Option<String>,
}

impl ActivityResult {
    pub fn success(name: impl Into<String>, exit_value: serde_json::Value) -> Self {
        Self {
            activity_name: name.into(),
            exit_value,
            exception: Some(SUCCESS_SENTINEL.to_string()),
        }
    }

    pub fn failure(name: impl Into<String>, exception: impl Into<String>) -> Self {
        Self {
            activity_name: name.into(),
            exit_value: serde_json::Value::Null,
            exception: Some(exception.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.exception.as_deref(), Some(e) if e != SUCCESS_SENTINEL)
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("{failed} of {total} activities failed")]
    ActivitiesFailed { failed: usize, total: usize },

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("batch timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("worker crashed: {0}")]
    Worker(String),
}

/// Outcome of one `run_batch` call.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// Every activity succeeded.
    Success(ResultMap),
    /// Some activities failed; results for the whole batch are available.
    Partial(ResultMap, BackendError),
    /// The call itself failed; no knowledge of what ran.
    Hard(BackendError),
}

impl BatchOutcome {
    /// Classify a complete result map as success or partial failure.
    pub fn from_results(results: ResultMap) -> Self {
        let failed = results.values().filter(|r| r.is_failed()).count();
        if failed == 0 {
            BatchOutcome::Success(results)
        } else {
            let total = results.len();
            BatchOutcome::Partial(results, BackendError::ActivitiesFailed { failed, total })
        }
    }
}

/// External substrate that actually runs a batch's activities.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Run one batch to completion (or hard failure).
    async fn run_batch(&self, batch: &Batch) -> BatchOutcome;
}
