use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{error, info, warn};

use super::execution::run_activity;
use crate::backend::{ActivityResult, BackendError, BatchOutcome, ExecutionBackend, ResultMap};
use crate::planner::{Activity, Batch};

/// Executes the work behind a single activity.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    type Error: Display + Send;

    /// Run the activity's job once. The returned value becomes the exit value.
    async fn run(&self, activity: &Activity) -> Result<serde_json::Value, Self::Error>;
}

/// Runs a batch on the current tokio runtime.
///
/// Activities start as soon as their `depends_on` predecessor has succeeded
/// and a concurrency permit is free. A failed predecessor fails its
/// dependents without running them.
pub struct LocalBackend<R> {
    runner: Arc<R>,
}

impl<R: JobRunner> LocalBackend<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner: Arc::new(runner),
        }
    }

    pub fn from_arc(runner: Arc<R>) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }
}

/// Every dependency must name an activity placed earlier in the same batch.
fn validate(batch: &Batch) -> Result<(), BackendError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for activity in &batch.activities {
        if let Some(dep) = activity.depends_on.as_deref() {
            if !seen.contains(dep) {
                return Err(BackendError::InvalidBatch(format!(
                    "activity '{}' depends on unknown or later activity '{}'",
                    activity.name, dep
                )));
            }
        }
        if !seen.insert(activity.name.as_str()) {
            return Err(BackendError::InvalidBatch(format!(
                "duplicate activity name '{}'",
                activity.name
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl<R: JobRunner> ExecutionBackend for LocalBackend<R> {
    fn name(&self) -> &str {
        "local"
    }

    async fn run_batch(&self, batch: &Batch) -> BatchOutcome {
        if let Err(e) = validate(batch) {
            error!(batch = batch.index, error = %e, "rejecting batch");
            return BatchOutcome::Hard(e);
        }
        if batch.is_empty() {
            return BatchOutcome::Success(ResultMap::new());
        }

        let semaphore = Arc::new(Semaphore::new(batch.concurrency.max(1)));
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<ActivityResult>();

        // One completion signal per activity: None = pending, Some(ok).
        let mut signals: HashMap<&str, watch::Receiver<Option<bool>>> = HashMap::new();
        let mut handles = Vec::with_capacity(batch.len());

        for activity in &batch.activities {
            let (done_tx, done_rx) = watch::channel(None);
            let upstream = activity
                .depends_on
                .as_deref()
                .and_then(|dep| signals.get(dep).cloned());
            signals.insert(activity.name.as_str(), done_rx);

            let activity = activity.clone();
            let runner = Arc::clone(&self.runner);
            let semaphore = Arc::clone(&semaphore);
            let result_tx = result_tx.clone();

            handles.push(tokio::spawn(async move {
                if let Some(mut rx) = upstream {
                    let upstream_ok = rx
                        .wait_for(Option::is_some)
                        .await
                        .map(|v| *v == Some(true))
                        .unwrap_or(false);
                    if !upstream_ok {
                        let dep = activity.depends_on.as_deref().unwrap_or_default();
                        let _ = done_tx.send(Some(false));
                        let _ = result_tx.send(ActivityResult::failure(
                            &activity.name,
                            format!("dependency failed: {dep}"),
                        ));
                        return;
                    }
                }

                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => run_activity(runner.as_ref(), &activity).await,
                    Err(_) => ActivityResult::failure(&activity.name, "concurrency limiter closed"),
                };
                let _ = done_tx.send(Some(!result.is_failed()));
                let _ = result_tx.send(result);
            }));
        }
        drop(result_tx);

        let deadline = tokio::time::sleep(batch.timeout);
        tokio::pin!(deadline);
        let mut results = ResultMap::new();
        let mut timed_out = false;

        loop {
            tokio::select! {
                msg = result_rx.recv() => match msg {
                    Some(r) => { results.insert(r.activity_name.clone(), r); }
                    None => break,
                },
                _ = &mut deadline => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            warn!(batch = batch.index, timeout_secs = batch.timeout.as_secs(), "batch timed out");
            for handle in &handles {
                handle.abort();
            }
            // Late results that raced the deadline still count.
            while let Ok(r) = result_rx.try_recv() {
                results.insert(r.activity_name.clone(), r);
            }
            for activity in &batch.activities {
                results.entry(activity.name.clone()).or_insert_with(|| {
                    ActivityResult::failure(
                        &activity.name,
                        format!("batch timed out after {}s", batch.timeout.as_secs()),
                    )
                });
            }
            info!(batch = batch.index, completed = results.len(), "local batch finished");
            return BatchOutcome::Partial(results, BackendError::Timeout(batch.timeout));
        } else if results.len() < batch.len() {
            // A task exited without reporting: it panicked.
            let mut crashed = Vec::new();
            for handle in handles {
                if let Err(e) = handle.await {
                    crashed.push(e.to_string());
                }
            }
            error!(batch = batch.index, crashed = crashed.len(), "activity task crashed");
            return BatchOutcome::Hard(BackendError::Worker(crashed.join("; ")));
        }

        info!(batch = batch.index, completed = results.len(), "local batch finished");
        BatchOutcome::from_results(results)
    }
}
