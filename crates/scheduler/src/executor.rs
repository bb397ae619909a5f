//! Batch executor: runs planned batches strictly one after another.
//!
//! A partial failure is absorbed (its results merged, execution continues);
//! a hard failure aborts the run before any later batch is dispatched.

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::backend::{ActivityResult, BackendError, BatchOutcome, ExecutionBackend, ResultMap};
use crate::metrics::RunMetrics;
use crate::planner::Batch;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("batch {batch} failed hard on backend '{backend}': {source}")]
    Hard {
        batch: usize,
        backend: String,
        #[source]
        source: BackendError,
        /// Results merged from batches that completed before the abort.
        completed: ResultMap,
    },
}

/// Merged results plus timing for every executed batch.
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub results: ResultMap,
    pub metrics: RunMetrics,
}

#[derive(Debug, Default)]
pub struct BatchExecutor;

impl BatchExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(
        &self,
        batches: &[Batch],
        backend: &dyn ExecutionBackend,
    ) -> Result<Execution, ExecutorError> {
        let mut results = ResultMap::new();
        let mut metrics = RunMetrics::default();

        for batch in batches {
            if batch.is_empty() {
                continue;
            }
            info!(
                batch = batch.index,
                activities = batch.len(),
                backend = backend.name(),
                "dispatching batch"
            );
            let started = Instant::now();

            let batch_results = match backend.run_batch(batch).await {
                BatchOutcome::Success(map) => map,
                BatchOutcome::Partial(map, err) => {
                    warn!(batch = batch.index, error = %err, "batch completed with failures, continuing");
                    map
                }
                BatchOutcome::Hard(err) => {
                    error!(batch = batch.index, error = %err, "batch failed hard, aborting run");
                    metrics.record_hard_failure(batch.index, batch.len(), started.elapsed());
                    return Err(ExecutorError::Hard {
                        batch: batch.index,
                        backend: backend.name().to_string(),
                        source: err,
                        completed: results,
                    });
                }
            };

            let (succeeded, failed) = merge_batch(&mut results, batch, batch_results);
            metrics.record_batch(batch.index, succeeded, failed, started.elapsed());
            info!(
                batch = batch.index,
                succeeded,
                failed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "batch finished"
            );
        }

        metrics.finish();
        Ok(Execution { results, metrics })
    }
}

/// Merge one batch's results, marking activities the backend never reported as failed.
fn merge_batch(results: &mut ResultMap, batch: &Batch, mut batch_results: ResultMap) -> (usize, usize) {
    let mut succeeded = 0;
    let mut failed = 0;
    for activity in &batch.activities {
        let result = batch_results
            .shift_remove(&activity.name)
            .unwrap_or_else(|| ActivityResult::failure(&activity.name, "no result reported by backend"));
        if result.is_failed() {
            failed += 1;
        } else {
            succeeded += 1;
        }
        results.insert(activity.name.clone(), result);
    }
    for name in batch_results.keys() {
        warn!(batch = batch.index, activity = %name, "backend reported unknown activity, ignoring");
    }
    (succeeded, failed)
}
