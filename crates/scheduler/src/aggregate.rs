//! Result aggregation: turns the merged per-activity map into a run verdict.
//!
//! Every failed activity is reported, not just the first one.

use serde::Serialize;

use crate::backend::{ActivityResult, ResultMap};
use crate::metrics::RunMetrics;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedActivity {
    pub name: String,
    pub exception: String,
}

/// Final summary of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub entries: Vec<ActivityResult>,
    pub failed: Vec<FailedActivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<RunMetrics>,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.entries.len() - self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn with_metrics(mut self, metrics: RunMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{} activities failed: {}", .report.failed.len(), failed_names(.report))]
pub struct AggregateError {
    pub report: RunReport,
}

impl AggregateError {
    pub fn failed_names(&self) -> Vec<&str> {
        self.report.failed.iter().map(|f| f.name.as_str()).collect()
    }
}

fn failed_names(report: &RunReport) -> String {
    report
        .failed
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the run report; an error carries the full report when anything failed.
pub fn aggregate(results: &ResultMap) -> Result<RunReport, AggregateError> {
    let failed: Vec<FailedActivity> = results
        .values()
        .filter(|r| r.is_failed())
        .map(|r| FailedActivity {
            name: r.activity_name.clone(),
            exception: r.exception.clone().unwrap_or_default(),
        })
        .collect();

    let report = RunReport {
        entries: results.values().cloned().collect(),
        failed,
        metrics: None,
    };

    if report.is_success() {
        Ok(report)
    } else {
        Err(AggregateError { report })
    }
}
