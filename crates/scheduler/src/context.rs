//! Explicit run context threaded through every scheduler call.

use chrono::{DateTime, Utc};
use fmd_core::Job;
use serde::Serialize;
use uuid::Uuid;

use crate::planner::PlannerConfig;

const NIL_GUID: &str = "00000000-0000-0000-0000-000000000000";

/// Insert hyphens into a bare 32-character GUID; anything else is returned as is.
pub fn format_guid(input: &str) -> String {
    if !input.contains('-') && input.len() == 32 && input.is_ascii() {
        format!(
            "{}-{}-{}-{}-{}",
            &input[..8],
            &input[8..12],
            &input[12..16],
            &input[16..20],
            &input[20..]
        )
    } else {
        input.to_string()
    }
}

/// True when `s` is a hyphenated GUID in canonical lowercase form.
pub fn is_valid_guid(s: &str) -> bool {
    Uuid::parse_str(s)
        .map(|u| u.hyphenated().to_string() == s)
        .unwrap_or(false)
}

/// Normalize an optional GUID, falling back to the nil GUID.
fn normalize_guid(input: Option<&str>) -> String {
    match input.map(format_guid) {
        Some(g) if is_valid_guid(&g) => g,
        _ => NIL_GUID.to_string(),
    }
}

/// Identity and limits of one scheduling run.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerContext {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub run_id: String,
    pub parent_run_id: String,
    pub trigger_id: String,
    pub trigger_type: String,
    pub trigger_time: String,
    pub workspace_id: String,
    pub execution_id: String,
    pub started_at: DateTime<Utc>,
    pub planner: PlannerConfig,
}

impl SchedulerContext {
    /// New context with fresh run/execution ids and nil identifiers elsewhere.
    pub fn new(pipeline_name: impl Into<String>, planner: PlannerConfig) -> Self {
        Self {
            pipeline_id: NIL_GUID.to_string(),
            pipeline_name: pipeline_name.into(),
            run_id: Uuid::new_v4().to_string(),
            parent_run_id: NIL_GUID.to_string(),
            trigger_id: NIL_GUID.to_string(),
            trigger_type: String::new(),
            trigger_time: String::new(),
            workspace_id: NIL_GUID.to_string(),
            execution_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            planner,
        }
    }

    pub fn with_pipeline_id(mut self, id: Option<&str>) -> Self {
        self.pipeline_id = normalize_guid(id);
        self
    }

    pub fn with_parent_run_id(mut self, id: Option<&str>) -> Self {
        self.parent_run_id = normalize_guid(id);
        self
    }

    pub fn with_workspace_id(mut self, id: Option<&str>) -> Self {
        self.workspace_id = normalize_guid(id);
        self
    }

    pub fn with_trigger(mut self, id: Option<&str>, kind: Option<&str>, time: Option<&str>) -> Self {
        self.trigger_id = normalize_guid(id);
        self.trigger_type = kind.unwrap_or_default().to_string();
        self.trigger_time = time.unwrap_or_default().to_string();
        self
    }

    /// Runtime parameters every job receives on top of its catalog params.
    pub fn runtime_params(&self) -> [(&'static str, &str); 9] {
        [
            ("PipelineGuid", &self.pipeline_id),
            ("PipelineName", &self.pipeline_name),
            ("TriggerGuid", &self.trigger_id),
            ("TriggerType", &self.trigger_type),
            ("TriggerTime", &self.trigger_time),
            ("WorkspaceGuid", &self.workspace_id),
            ("PipelineParentRunGuid", &self.parent_run_id),
            ("PipelineRunGuid", &self.run_id),
            ("NotebookExecutionId", &self.execution_id),
        ]
    }

    /// Return a copy of `job` with the runtime parameters injected.
    pub fn inject(&self, job: &Job) -> Job {
        let mut job = job.clone();
        for (key, value) in self.runtime_params() {
            job.params.insert(key.to_string(), value.to_string());
        }
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fmd_core::GroupKey;

    #[test]
    fn formats_bare_guid() {
        assert_eq!(
            format_guid("0123456789abcdef0123456789abcdef"),
            "01234567-89ab-cdef-0123-456789abcdef"
        );
        assert_eq!(format_guid("short"), "short");
    }

    #[test]
    fn invalid_guids_fall_back_to_nil() {
        let ctx = SchedulerContext::new("p", PlannerConfig::default())
            .with_trigger(Some("not-a-guid"), Some("Manual"), None)
            .with_parent_run_id(None);
        assert_eq!(ctx.trigger_id, NIL_GUID);
        assert_eq!(ctx.parent_run_id, NIL_GUID);
        assert_eq!(ctx.trigger_type, "Manual");
        assert_eq!(ctx.trigger_time, "");
    }

    #[test]
    fn bare_trigger_guid_is_normalized() {
        let ctx = SchedulerContext::new("p", PlannerConfig::default())
            .with_trigger(Some("0123456789abcdef0123456789abcdef"), None, None);
        assert_eq!(ctx.trigger_id, "01234567-89ab-cdef-0123-456789abcdef");
    }

    #[test]
    fn pipeline_and_workspace_ids_reach_injected_params() {
        let ctx = SchedulerContext::new("p", PlannerConfig::default())
            .with_pipeline_id(Some("0123456789abcdef0123456789abcdef"))
            .with_workspace_id(Some("bogus"));
        let injected = ctx.inject(&Job::new("j", GroupKey::new("a", "b", "c")));
        assert_eq!(
            injected.param("PipelineGuid"),
            Some("01234567-89ab-cdef-0123-456789abcdef")
        );
        assert_eq!(injected.param("WorkspaceGuid"), Some(NIL_GUID));
    }

    #[test]
    fn inject_overwrites_runtime_keys_only() {
        let ctx = SchedulerContext::new("nightly", PlannerConfig::default());
        let job = Job::new("j", GroupKey::new("a", "b", "c"))
            .with_param("PipelineName", "stale")
            .with_param("PrimaryKeys", "Id");
        let injected = ctx.inject(&job);
        assert_eq!(injected.param("PipelineName"), Some("nightly"));
        assert_eq!(injected.param("PrimaryKeys"), Some("Id"));
        assert_eq!(injected.param("PipelineRunGuid"), Some(ctx.run_id.as_str()));
        assert_eq!(job.param("PipelineName"), Some("stale"));
    }

    #[test]
    fn run_ids_are_unique_per_context() {
        let a = SchedulerContext::new("p", PlannerConfig::default());
        let b = SchedulerContext::new("p", PlannerConfig::default());
        assert_ne!(a.run_id, b.run_id);
        assert!(is_valid_guid(&a.run_id));
    }
}
