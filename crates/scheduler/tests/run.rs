use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fmd_core::{GroupKey, Job};
use fmd_scheduler::{
    Activity, ActivityResult, BackendError, Batch, BatchOutcome, ExecutionBackend, JobRunner,
    LocalBackend, PlannerConfig, Scheduler, SchedulerContext, SchedulerError,
};
use serde_json::json;

/// Fails the jobs whose id is listed, records completion order.
struct Recorder {
    failing: Vec<&'static str>,
    log: Mutex<Vec<String>>,
}

impl Recorder {
    fn new(failing: Vec<&'static str>) -> Self {
        Self { failing, log: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl JobRunner for Recorder {
    type Error = String;

    async fn run(&self, activity: &Activity) -> Result<serde_json::Value, String> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.log.lock().unwrap().push(activity.job.id.clone());
        if self.failing.iter().any(|f| *f == activity.job.id) {
            Err(format!("{} failed to load", activity.job.id))
        } else {
            Ok(json!({ "job": activity.job.id }))
        }
    }
}

fn ctx(max: usize) -> SchedulerContext {
    SchedulerContext::new(
        "integration",
        PlannerConfig {
            max_concurrency: max,
            retry_count: 0,
            ..Default::default()
        },
    )
}

fn job(id: &str, table: &str, file: &str) -> Job {
    Job::new(id, GroupKey::new("erp", "bronze/erp", table)).with_source_file(file)
}

#[tokio::test]
async fn partial_failure_reports_every_failed_activity_and_keeps_going() {
    let jobs = vec![
        job("j1", "orders", "orders_202601010000.json"),
        job("j2", "customers", "customers_202601010000.json"),
        job("j3", "products", "products_202601010000.json"),
        job("j4", "invoices", "invoices_202601010000.json"),
    ];
    let backend = LocalBackend::new(Recorder::new(vec!["j2"]));
    let err = Scheduler::new()
        .run(&ctx(3), jobs, &backend)
        .await
        .unwrap_err();

    let report = err.report().expect("run should complete with a report");
    assert_eq!(report.entries.len(), 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].name, "bronze_customers_0_1");
    assert_eq!(report.failed[0].exception, "j2 failed to load");

    // The second batch still ran.
    assert!(backend.runner().log.lock().unwrap().contains(&"j4".to_string()));
    let metrics = report.metrics.as_ref().unwrap();
    assert_eq!(metrics.batches.len(), 2);
    assert_eq!(metrics.failed(), 1);
}

#[tokio::test]
async fn group_members_run_in_timestamp_order() {
    let jobs = vec![
        job("late", "orders", "orders_202603010000.json"),
        job("other", "customers", "customers_202601010000.json"),
        job("early", "orders", "orders_202601010000.json"),
        job("nostamp", "orders", "orders.json"),
        job("mid", "orders", "orders_202602010000.json"),
    ];
    let backend = LocalBackend::new(Recorder::new(vec![]));
    let report = Scheduler::new().run(&ctx(50), jobs, &backend).await.unwrap();
    assert!(report.is_success());

    let log = backend.runner().log.lock().unwrap().clone();
    let orders: Vec<&str> = log
        .iter()
        .map(String::as_str)
        .filter(|id| *id != "other")
        .collect();
    assert_eq!(orders, vec!["early", "mid", "late", "nostamp"]);
}

#[tokio::test]
async fn failure_inside_group_fails_later_members() {
    let jobs = vec![
        job("first", "orders", "orders_202601010000.json"),
        job("second", "orders", "orders_202602010000.json"),
    ];
    let backend = LocalBackend::new(Recorder::new(vec!["first"]));
    let err = Scheduler::new().run(&ctx(50), jobs, &backend).await.unwrap_err();
    let report = err.report().unwrap();
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed[1].exception.starts_with("dependency failed"));
    assert_eq!(*backend.runner().log.lock().unwrap(), vec!["first".to_string()]);
}

/// Answers the first batch normally and fails every later call hard.
struct FlakyTransport {
    calls: Mutex<usize>,
}

#[async_trait]
impl ExecutionBackend for FlakyTransport {
    fn name(&self) -> &str {
        "flaky-transport"
    }

    async fn run_batch(&self, batch: &Batch) -> BatchOutcome {
        let mut calls = self.calls.lock().unwrap();
        *calls += 1;
        if *calls > 1 {
            return BatchOutcome::Hard(BackendError::Transport("connection refused".into()));
        }
        BatchOutcome::from_results(
            batch
                .activities
                .iter()
                .map(|a| (a.name.clone(), ActivityResult::success(&a.name, json!(null))))
                .collect(),
        )
    }
}

#[tokio::test]
async fn hard_failure_aborts_the_run() {
    let jobs = vec![
        job("a", "orders", "orders_202601010000.json"),
        job("b", "customers", "customers_202601010000.json"),
        job("c", "products", "products_202601010000.json"),
    ];
    let backend = FlakyTransport { calls: Mutex::new(0) };
    let err = Scheduler::new().run(&ctx(1), jobs, &backend).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Hard(_)));
    assert!(err.report().is_none());
    assert_eq!(*backend.calls.lock().unwrap(), 2);
}
