use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fmd_core::{GroupKey, Job};
use serde_json::json;

use super::{JobRunner, LocalBackend};
use crate::backend::{BackendError, BatchOutcome, ExecutionBackend};
use crate::planner::{Activity, Batch};

/// Behaviour a mock job exhibits, keyed by job id.
#[derive(Clone)]
enum Script {
    Ok,
    Fail,
    /// Fail this many times, then succeed.
    Flaky(usize),
    Sleep(Duration),
    Panic,
}

struct MockRunner {
    scripts: HashMap<String, Script>,
    attempts: Mutex<HashMap<String, usize>>,
    finished: Mutex<Vec<String>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockRunner {
    fn new(scripts: &[(&str, Script)]) -> Self {
        Self {
            scripts: scripts.iter().map(|(k, s)| (k.to_string(), s.clone())).collect(),
            attempts: Mutex::new(HashMap::new()),
            finished: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn attempts(&self, id: &str) -> usize {
        self.attempts.lock().unwrap().get(id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl JobRunner for MockRunner {
    type Error = String;

    async fn run(&self, activity: &Activity) -> Result<serde_json::Value, String> {
        let id = activity.job.id.clone();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(id.clone()).or_default();
            *n += 1;
            *n
        };
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let script = self.scripts.get(&id).cloned().unwrap_or(Script::Ok);
        let outcome = match script {
            Script::Ok => Ok(json!({ "rows": 1 })),
            Script::Fail => Err(format!("{id} exploded")),
            Script::Flaky(n) if attempt <= n => Err(format!("{id} flaked")),
            Script::Flaky(_) => Ok(json!(attempt)),
            Script::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(json!(null))
            }
            Script::Panic => panic!("job {id} panicked"),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push(id);
        outcome
    }
}

fn activity(id: &str, depends_on: Option<&str>) -> Activity {
    Activity {
        name: id.to_string(),
        job: Job::new(id, GroupKey::new("erp", "sales", id)),
        order_index: 0,
        timeout_per_step: Duration::from_secs(5),
        retry_count: 0,
        retry_interval: Duration::ZERO,
        depends_on: depends_on.map(String::from),
    }
}

fn batch(activities: Vec<Activity>) -> Batch {
    Batch {
        index: 0,
        concurrency: activities.len(),
        activities,
        timeout: Duration::from_secs(10),
    }
}

#[tokio::test]
async fn all_success() {
    let backend = LocalBackend::new(MockRunner::new(&[]));
    let outcome = backend
        .run_batch(&batch(vec![activity("a", None), activity("b", None)]))
        .await;
    match outcome {
        BatchOutcome::Success(map) => {
            assert_eq!(map.len(), 2);
            assert_eq!(map["a"].exit_value, json!({ "rows": 1 }));
        }
        other => panic!("expected success, got {:?}", other),
    }
}

#[tokio::test]
async fn one_failure_yields_partial_with_all_results() {
    let backend = LocalBackend::new(MockRunner::new(&[("b", Script::Fail)]));
    let outcome = backend
        .run_batch(&batch(vec![activity("a", None), activity("b", None), activity("c", None)]))
        .await;
    match outcome {
        BatchOutcome::Partial(map, BackendError::ActivitiesFailed { failed, total }) => {
            assert_eq!((failed, total), (1, 3));
            assert!(map["b"].is_failed());
            assert_eq!(map["b"].exception.as_deref(), Some("b exploded"));
            assert!(!map["a"].is_failed());
        }
        other => panic!("expected partial, got {:?}", other),
    }
}

#[tokio::test]
async fn dependents_run_after_predecessor() {
    let runner = Arc::new(MockRunner::new(&[("a", Script::Sleep(Duration::from_millis(50)))]));
    let backend = LocalBackend::from_arc(Arc::clone(&runner));
    let outcome = backend
        .run_batch(&batch(vec![
            activity("a", None),
            activity("b", Some("a")),
            activity("c", Some("b")),
        ]))
        .await;
    assert!(matches!(outcome, BatchOutcome::Success(_)));
    assert_eq!(*runner.finished.lock().unwrap(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn failed_predecessor_skips_dependents() {
    let runner = Arc::new(MockRunner::new(&[("a", Script::Fail)]));
    let backend = LocalBackend::from_arc(Arc::clone(&runner));
    let outcome = backend
        .run_batch(&batch(vec![
            activity("a", None),
            activity("b", Some("a")),
            activity("c", Some("b")),
            activity("d", None),
        ]))
        .await;
    let BatchOutcome::Partial(map, _) = outcome else {
        panic!("expected partial");
    };
    assert_eq!(map["b"].exception.as_deref(), Some("dependency failed: a"));
    assert_eq!(map["c"].exception.as_deref(), Some("dependency failed: b"));
    assert!(!map["d"].is_failed());
    assert_eq!(runner.attempts("b"), 0);
    assert_eq!(runner.attempts("c"), 0);
}

#[tokio::test]
async fn retries_until_success() {
    let runner = Arc::new(MockRunner::new(&[("a", Script::Flaky(2))]));
    let backend = LocalBackend::from_arc(Arc::clone(&runner));
    let mut a = activity("a", None);
    a.retry_count = 2;
    let outcome = backend.run_batch(&batch(vec![a])).await;
    assert!(matches!(outcome, BatchOutcome::Success(_)));
    assert_eq!(runner.attempts("a"), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let runner = Arc::new(MockRunner::new(&[("a", Script::Fail)]));
    let backend = LocalBackend::from_arc(Arc::clone(&runner));
    let mut a = activity("a", None);
    a.retry_count = 2;
    a.retry_interval = Duration::from_millis(1);
    let outcome = backend.run_batch(&batch(vec![a])).await;
    assert!(matches!(outcome, BatchOutcome::Partial(..)));
    assert_eq!(runner.attempts("a"), 3);
}

#[tokio::test]
async fn step_timeout_fails_activity() {
    let backend = LocalBackend::new(MockRunner::new(&[("slow", Script::Sleep(Duration::from_secs(5)))]));
    let mut slow = activity("slow", None);
    slow.timeout_per_step = Duration::from_millis(20);
    let BatchOutcome::Partial(map, _) = backend.run_batch(&batch(vec![slow])).await else {
        panic!("expected partial");
    };
    assert!(map["slow"].exception.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn batch_timeout_fails_outstanding_activities() {
    let backend = LocalBackend::new(MockRunner::new(&[("slow", Script::Sleep(Duration::from_secs(5)))]));
    let mut b = batch(vec![activity("fast", None), activity("slow", None)]);
    b.timeout = Duration::from_millis(100);
    let BatchOutcome::Partial(map, reason) = backend.run_batch(&b).await else {
        panic!("expected partial");
    };
    assert_eq!(reason, BackendError::Timeout(Duration::from_millis(100)));
    assert!(!map["fast"].is_failed());
    assert!(map["slow"].exception.as_deref().unwrap().contains("batch timed out"));
}

#[tokio::test]
async fn concurrency_is_bounded() {
    let scripts: Vec<(String, Script)> = (0..6)
        .map(|i| (format!("j{i}"), Script::Sleep(Duration::from_millis(30))))
        .collect();
    let refs: Vec<(&str, Script)> = scripts.iter().map(|(k, s)| (k.as_str(), s.clone())).collect();
    let runner = Arc::new(MockRunner::new(&refs));
    let backend = LocalBackend::from_arc(Arc::clone(&runner));
    let mut b = batch((0..6).map(|i| activity(&format!("j{i}"), None)).collect());
    b.concurrency = 2;
    assert!(matches!(backend.run_batch(&b).await, BatchOutcome::Success(_)));
    assert!(runner.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn unknown_dependency_is_hard_failure() {
    let backend = LocalBackend::new(MockRunner::new(&[]));
    let outcome = backend
        .run_batch(&batch(vec![activity("a", Some("ghost"))]))
        .await;
    assert!(matches!(outcome, BatchOutcome::Hard(BackendError::InvalidBatch(_))));
}

#[tokio::test]
async fn panicking_job_is_hard_failure() {
    let backend = LocalBackend::new(MockRunner::new(&[("boom", Script::Panic)]));
    let outcome = backend
        .run_batch(&batch(vec![activity("ok", None), activity("boom", None)]))
        .await;
    assert!(matches!(outcome, BatchOutcome::Hard(BackendError::Worker(_))));
}
