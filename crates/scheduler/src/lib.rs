//! Batch scheduler for entity jobs.
//!
//! Jobs are grouped by target table, ordered by the timestamp embedded in
//! their source file name, packed into concurrency-bounded batches with
//! intra-group `depends_on` chains, dispatched batch by batch to an
//! [`ExecutionBackend`], and finally aggregated into a [`RunReport`].

pub mod aggregate;
pub mod audit;
pub mod backend;
pub mod context;
pub mod executor;
pub mod local;
pub mod metrics;
pub mod ordering;
pub mod planner;
pub mod runner;

pub use aggregate::{aggregate, AggregateError, FailedActivity, RunReport};
pub use audit::{
    sink_from_name, AuditEvent, AuditEventKind, AuditSink, JsonlAuditSink, MemoryAuditSink,
    TracingAuditSink,
};
pub use backend::{ActivityResult, BackendError, BatchOutcome, ExecutionBackend, ResultMap, SUCCESS_SENTINEL};
pub use context::SchedulerContext;
pub use executor::{BatchExecutor, Execution, ExecutorError};
pub use local::{JobRunner, LocalBackend};
pub use metrics::RunMetrics;
pub use ordering::{extract_timestamp, order_jobs, PlannedJob};
pub use planner::{Activity, Batch, BatchPlanner, PlanError, PlannerConfig};
pub use runner::{Scheduler, SchedulerError};
