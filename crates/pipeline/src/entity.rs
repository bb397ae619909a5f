//! The entity job: one landing file into bronze, or one bronze table into silver.
//!
//! The layer comes from the `EntityLayer` job parameter. Every run publishes
//! an audit start event and a matching end event carrying the merge outcome
//! or the error text.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fmd_core::Job;
use fmd_merge::{
    load_bronze, load_silver, parse_primary_keys, parse_rules, qualified_table_name,
    BronzeOptions, CleansingRegistry, CleansingRule, MergeOutcome, VersionedTableStore,
};
use fmd_scheduler::{Activity, AuditEvent, AuditSink, JobRunner, SchedulerContext};
use serde_json::{json, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::JobError;
use crate::source::read_rows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLayer {
    Bronze,
    Silver,
}

impl EntityLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityLayer::Bronze => "bronze",
            EntityLayer::Silver => "silver",
        }
    }

    /// Explicit `EntityLayer`, else bronze when the job names a source file.
    pub fn for_job(job: &Job) -> Result<Self, JobError> {
        match job.param("EntityLayer") {
            Some(layer) => match layer.to_ascii_lowercase().as_str() {
                "bronze" => Ok(EntityLayer::Bronze),
                "silver" => Ok(EntityLayer::Silver),
                _ => Err(JobError::UnknownLayer(layer.to_string())),
            },
            None if job.source_file_name.is_some() => Ok(EntityLayer::Bronze),
            None => Err(JobError::MissingParam("EntityLayer")),
        }
    }
}

impl fmt::Display for EntityLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything other than an explicit false counts as incremental.
pub fn is_incremental(raw: Option<&str>) -> bool {
    match raw {
        None => false,
        Some(v) => !v.trim().eq_ignore_ascii_case("false"),
    }
}

/// Job parameters resolved for one load.
#[derive(Debug, Clone)]
pub struct EntityParams {
    pub layer: EntityLayer,
    pub target_table: String,
    pub source: EntitySource,
    pub cleansing_rules: Vec<CleansingRule>,
}

#[derive(Debug, Clone)]
pub enum EntitySource {
    /// `{landing}/{SourceFilePath}/{SourceFileName}`
    Landing {
        relative_path: PathBuf,
        options: BronzeOptions,
    },
    /// Bronze table feeding a silver target.
    Bronze { table: String },
}

impl EntityParams {
    pub fn from_job(job: &Job) -> Result<Self, JobError> {
        let layer = EntityLayer::for_job(job)?;
        let key = &job.group_key;
        let namespace = job.param("DataSourceNamespace").unwrap_or(key.namespace.as_str());
        let target_table = qualified_table_name(namespace, &key.target_schema, &key.target_table);
        let cleansing_rules = parse_rules(job.param("cleansing_rules").unwrap_or_default())?;

        let source = match layer {
            EntityLayer::Bronze => {
                let file_name = job
                    .param("SourceFileName")
                    .or(job.source_file_name.as_deref())
                    .ok_or(JobError::MissingParam("SourceFileName"))?;
                let mut relative_path = PathBuf::new();
                if let Some(dir) = job.param("SourceFilePath") {
                    relative_path.push(dir);
                }
                relative_path.push(file_name);

                let primary_keys =
                    parse_primary_keys(job.param("PrimaryKeys").ok_or(JobError::MissingParam("PrimaryKeys"))?);
                EntitySource::Landing {
                    relative_path,
                    options: BronzeOptions {
                        primary_keys,
                        is_incremental: is_incremental(job.param("IsIncremental")),
                        cleansing_rules: cleansing_rules.clone(),
                    },
                }
            }
            EntityLayer::Silver => {
                let schema = job.param("SourceSchema").ok_or(JobError::MissingParam("SourceSchema"))?;
                let name = job.param("SourceName").ok_or(JobError::MissingParam("SourceName"))?;
                EntitySource::Bronze {
                    table: qualified_table_name(namespace, schema, name),
                }
            }
        };

        Ok(Self {
            layer,
            target_table,
            source,
            cleansing_rules,
        })
    }
}

/// [`JobRunner`] that performs entity loads against a versioned table store.
#[derive(Clone)]
pub struct EntityJobRunner {
    ctx: SchedulerContext,
    store: Arc<dyn VersionedTableStore>,
    registry: Arc<CleansingRegistry>,
    audit: Arc<dyn AuditSink>,
    landing_dir: PathBuf,
    /// One write lock per target table.
    table_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl EntityJobRunner {
    pub fn new(
        ctx: SchedulerContext,
        store: Arc<dyn VersionedTableStore>,
        audit: Arc<dyn AuditSink>,
        landing_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ctx,
            store,
            registry: Arc::new(CleansingRegistry::with_builtins()),
            audit,
            landing_dir: landing_dir.into(),
            table_locks: Arc::default(),
        }
    }

    async fn lock_table(&self, table: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.table_locks.lock().await;
            locks.entry(table.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Run the load on the blocking pool; stores do synchronous file IO.
    ///
    /// The table guard moves into the blocking task, so a load whose attempt
    /// timed out keeps the table locked until it actually returns.
    async fn load(&self, params: EntityParams) -> Result<MergeOutcome, JobError> {
        let store = self.store.clone();
        let registry = self.registry.clone();
        let landing_dir = self.landing_dir.clone();
        let guard = self.lock_table(&params.target_table).await;

        let outcome = tokio::task::spawn_blocking(move || -> Result<MergeOutcome, JobError> {
            let _guard = guard;
            match params.source {
                EntitySource::Landing { relative_path, options } => {
                    let path = landing_dir.join(relative_path);
                    let rows = read_rows(&path)?;
                    debug!(path = %path.display(), rows = rows.len(), "landing file read");
                    Ok(load_bronze(
                        store.as_ref(),
                        &registry,
                        &params.target_table,
                        rows,
                        &options,
                    )?)
                }
                EntitySource::Bronze { table } => Ok(load_silver(
                    store.as_ref(),
                    &registry,
                    &table,
                    &params.target_table,
                    &params.cleansing_rules,
                )?),
            }
        })
        .await??;
        Ok(outcome)
    }
}

#[async_trait]
impl JobRunner for EntityJobRunner {
    type Error = JobError;

    async fn run(&self, activity: &Activity) -> Result<Value, JobError> {
        let layer = EntityLayer::for_job(&activity.job)
            .map(|l| l.as_str())
            .unwrap_or("unknown");
        let start = AuditEvent::start(&self.ctx, activity, layer);
        self.audit.record(&start);

        let result = match EntityParams::from_job(&activity.job) {
            Ok(params) => {
                let target = params.target_table.clone();
                self.load(params).await.map(|outcome| (target, outcome))
            }
            Err(e) => Err(e),
        };

        match result {
            Ok((target, outcome)) => {
                let details = json!({ "table": target, "result": outcome });
                self.audit.record(&AuditEvent::end(&start, true, Some(details.clone())));
                info!(
                    activity = %activity.name,
                    layer,
                    table = %target,
                    rows_written = outcome.rows_written(),
                    "entity load complete"
                );
                Ok(details)
            }
            Err(e) => {
                let details = json!({ "error": e.to_string() });
                self.audit.record(&AuditEvent::end(&start, false, Some(details)));
                Err(e)
            }
        }
    }
}
