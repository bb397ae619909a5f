//! Audit events emitted around every entity load.
//!
//! Sinks never surface errors to the caller: a failure to record an event is
//! logged with `warn!` and the job carries on.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::SchedulerContext;
use crate::planner::Activity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEventKind {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub kind: AuditEventKind,
    pub run_id: String,
    pub parent_run_id: String,
    pub trigger_id: String,
    pub entity_id: String,
    pub entity_layer: String,
    pub target_schema: String,
    pub target_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// `succeeded` or `failed`; absent on start events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn start(ctx: &SchedulerContext, activity: &Activity, layer: &str) -> Self {
        Self {
            kind: AuditEventKind::Start,
            run_id: ctx.run_id.clone(),
            parent_run_id: ctx.parent_run_id.clone(),
            trigger_id: ctx.trigger_id.clone(),
            entity_id: activity.job.id.clone(),
            entity_layer: layer.to_string(),
            target_schema: activity.job.group_key.target_schema.clone(),
            target_name: activity.job.group_key.target_table.clone(),
            timestamp: Utc::now(),
            duration_ms: None,
            outcome: None,
            details: None,
        }
    }

    /// Closing event for a previously started load.
    pub fn end(start: &AuditEvent, succeeded: bool, details: Option<serde_json::Value>) -> Self {
        let now = Utc::now();
        let elapsed = (now - start.timestamp).num_milliseconds().max(0) as u64;
        Self {
            kind: AuditEventKind::End,
            timestamp: now,
            duration_ms: Some(elapsed),
            outcome: Some(if succeeded { "succeeded" } else { "failed" }.to_string()),
            details,
            ..start.clone()
        }
    }
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Emits each event as a structured tracing record.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        info!(
            target: "fmd::audit",
            kind = ?event.kind,
            run_id = %event.run_id,
            entity_id = %event.entity_id,
            layer = %event.entity_layer,
            target = %format!("{}.{}", event.target_schema, event.target_name),
            duration_ms = event.duration_ms,
            outcome = event.outcome.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// In-memory audit trail capped at a fixed size with FIFO eviction.
#[derive(Clone)]
pub struct MemoryAuditSink {
    events: Arc<RwLock<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_max_events(500)
    }

    pub fn with_max_events(max: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::new())),
            max_events: max,
        }
    }

    /// Snapshot of recorded events, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.read() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn for_entity(&self, entity_id: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.entity_id == entity_id)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.events.write() {
            guard.clear();
        }
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) {
        let Ok(mut guard) = self.events.write() else {
            warn!("audit sink lock poisoned, dropping event");
            return;
        };
        guard.push_back(event.clone());
        while guard.len() > self.max_events {
            guard.pop_front();
        }
    }
}

/// Appends one JSON line per event.
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) {
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "failed to serialize audit event");
                return;
            }
        };

        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(dir) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!(error = %e, "failed to create audit log directory");
                return;
            }
        }
        let mut file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "failed to open audit log");
                return;
            }
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(error = %e, "failed to write audit event");
        }
    }
}

/// Build a sink from its configured name (`tracing`, `jsonl`, `memory`).
pub fn sink_from_name(name: &str, log_path: &Path) -> Arc<dyn AuditSink> {
    match name {
        "jsonl" => Arc::new(JsonlAuditSink::new(log_path)),
        "memory" => Arc::new(MemoryAuditSink::new()),
        "tracing" => Arc::new(TracingAuditSink),
        other => {
            warn!(sink = other, "unknown audit sink, falling back to tracing");
            Arc::new(TracingAuditSink)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannerConfig;
    use fmd_core::{GroupKey, Job};
    use std::time::Duration;

    fn activity() -> Activity {
        Activity {
            name: "bronze_orders_0_0".into(),
            job: Job::new("e1", GroupKey::new("erp", "bronze", "orders")),
            order_index: 0,
            timeout_per_step: Duration::from_secs(1),
            retry_count: 0,
            retry_interval: Duration::ZERO,
            depends_on: None,
        }
    }

    fn ctx() -> SchedulerContext {
        SchedulerContext::new("test", PlannerConfig::default())
    }

    #[test]
    fn end_event_copies_identity() {
        let start = AuditEvent::start(&ctx(), &activity(), "bronze");
        let end = AuditEvent::end(&start, false, Some(serde_json::json!({"error": "x"})));
        assert_eq!(end.kind, AuditEventKind::End);
        assert_eq!(end.run_id, start.run_id);
        assert_eq!(end.target_name, "orders");
        assert_eq!(end.outcome.as_deref(), Some("failed"));
        assert!(end.duration_ms.is_some());
    }

    #[test]
    fn memory_sink_evicts_oldest() {
        let sink = MemoryAuditSink::with_max_events(2);
        let ctx = ctx();
        for id in ["a", "b", "c"] {
            let mut act = activity();
            act.job.id = id.into();
            sink.record(&AuditEvent::start(&ctx, &act, "bronze"));
        }
        let ids: Vec<_> = sink.events().into_iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(sink.for_entity("c").len(), 1);
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("events.jsonl");
        let sink = JsonlAuditSink::new(&path);
        let start = AuditEvent::start(&ctx(), &activity(), "silver");
        sink.record(&start);
        sink.record(&AuditEvent::end(&start, true, None));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["kind"], "start");
        assert_eq!(first["entityLayer"], "silver");
        assert!(first.get("outcome").is_none());
    }

    #[test]
    fn jsonl_sink_swallows_io_errors() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes open fail.
        let sink = JsonlAuditSink::new(dir.path());
        sink.record(&AuditEvent::start(&ctx(), &activity(), "bronze"));
    }
}
