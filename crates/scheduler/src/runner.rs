//! Orchestrating entry point: order, inject, plan, execute, aggregate.

use fmd_core::Job;
use tracing::info;

use crate::aggregate::{aggregate, AggregateError, RunReport};
use crate::backend::ExecutionBackend;
use crate::context::SchedulerContext;
use crate::executor::{BatchExecutor, ExecutorError};
use crate::ordering::order_jobs;
use crate::planner::{Batch, BatchPlanner, PlanError};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Hard(#[from] ExecutorError),

    #[error(transparent)]
    Failed(#[from] AggregateError),
}

impl SchedulerError {
    /// Report of the finished run, available when activities failed but the run completed.
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            SchedulerError::Failed(e) => Some(&e.report),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct Scheduler {
    executor: BatchExecutor,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Order jobs, inject runtime parameters and pack them into batches.
    pub fn plan(&self, ctx: &SchedulerContext, jobs: Vec<Job>) -> Result<Vec<Batch>, SchedulerError> {
        let jobs = jobs.iter().map(|j| ctx.inject(j)).collect();
        let ordered = order_jobs(jobs);
        let batches = BatchPlanner::new(ctx.planner.clone()).plan(&ordered)?;
        Ok(batches)
    }

    /// Plan and execute `jobs` on `backend`, then aggregate the results.
    pub async fn run(
        &self,
        ctx: &SchedulerContext,
        jobs: Vec<Job>,
        backend: &dyn ExecutionBackend,
    ) -> Result<RunReport, SchedulerError> {
        info!(
            run_id = %ctx.run_id,
            pipeline = %ctx.pipeline_name,
            jobs = jobs.len(),
            backend = backend.name(),
            "starting run"
        );
        let batches = self.plan(ctx, jobs)?;
        let execution = self.executor.execute(&batches, backend).await?;
        let metrics = execution.metrics;

        match aggregate(&execution.results) {
            Ok(report) => {
                info!(
                    run_id = %ctx.run_id,
                    batches = batches.len(),
                    succeeded = report.succeeded(),
                    "run finished"
                );
                Ok(report.with_metrics(metrics))
            }
            Err(mut err) => {
                info!(
                    run_id = %ctx.run_id,
                    batches = batches.len(),
                    succeeded = err.report.succeeded(),
                    failed = err.report.failed.len(),
                    "run finished with failures"
                );
                err.report.metrics = Some(metrics);
                Err(SchedulerError::Failed(err))
            }
        }
    }
}
