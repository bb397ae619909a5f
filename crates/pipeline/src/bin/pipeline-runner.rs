//! pipeline-runner: plan or execute a job manifest on the local backend.
//!
//! `plan` prints the batches as JSON without running anything. `run`
//! executes every batch against the file-backed table store and prints the
//! run report; the process exits non-zero when the run hard-fails or any
//! activity failed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use fmd_core::config::{load_dotenv, StorageConfig};
use fmd_core::{parse_manifest, Config};
use fmd_merge::FileTableStore;
use fmd_pipeline::EntityJobRunner;
use fmd_scheduler::{
    sink_from_name, LocalBackend, PlannerConfig, RunReport, Scheduler, SchedulerContext,
    SchedulerError,
};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pipeline-runner", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the batch plan without executing it.
    Plan(RunArgs),
    /// Execute the plan and print the run report.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Job manifest: JSON array of catalog entries.
    #[arg(long)]
    jobs: PathBuf,

    /// Upper bound on activities per batch.
    #[arg(long, env = "FMD_MAX_CONCURRENCY")]
    max_concurrency: Option<usize>,

    /// Root for landing files, tables and audit logs.
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value = "pipeline-runner")]
    pipeline_name: String,

    #[arg(long, env = "FMD_PIPELINE_ID")]
    pipeline_id: Option<String>,

    #[arg(long, env = "FMD_WORKSPACE_ID")]
    workspace_id: Option<String>,

    #[arg(long, env = "FMD_TRIGGER_ID")]
    trigger_id: Option<String>,

    #[arg(long, env = "FMD_TRIGGER_TYPE")]
    trigger_type: Option<String>,

    #[arg(long, env = "FMD_TRIGGER_TIME")]
    trigger_time: Option<String>,

    #[arg(long, env = "FMD_PARENT_RUN_ID")]
    parent_run_id: Option<String>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the environment config.
    fn apply(&self, config: &mut Config) {
        if let Some(n) = self.max_concurrency {
            config.scheduler.max_concurrency = n;
        }
        if let Some(dir) = &self.data_dir {
            config.storage = StorageConfig::with_overrides(dir.clone(), None, None);
            config.audit.log_path = dir.join("audit").join("jobs.jsonl");
        }
    }

    fn context(&self, config: &Config) -> SchedulerContext {
        SchedulerContext::new(&self.pipeline_name, PlannerConfig::from(&config.scheduler))
            .with_trigger(
                self.trigger_id.as_deref(),
                self.trigger_type.as_deref(),
                self.trigger_time.as_deref(),
            )
            .with_parent_run_id(self.parent_run_id.as_deref())
            .with_pipeline_id(self.pipeline_id.as_deref())
            .with_workspace_id(self.workspace_id.as_deref())
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Plan(args) => plan(args),
        Command::Run(args) => run(args).await,
    }
}

fn load(args: &RunArgs) -> Result<(Config, Vec<fmd_core::Job>)> {
    let mut config = Config::from_env();
    args.apply(&mut config);
    config.log_summary();

    let manifest = std::fs::read_to_string(&args.jobs)
        .with_context(|| format!("failed to read job manifest {}", args.jobs.display()))?;
    let jobs = parse_manifest(&manifest).context("invalid job manifest")?;
    info!(jobs = jobs.len(), path = %args.jobs.display(), "job manifest loaded");
    Ok((config, jobs))
}

fn plan(args: RunArgs) -> Result<()> {
    let (config, jobs) = load(&args)?;
    let ctx = args.context(&config);
    let batches = Scheduler::new().plan(&ctx, jobs).context("planning failed")?;
    println!("{}", serde_json::to_string_pretty(&batches)?);
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let (config, jobs) = load(&args)?;
    let ctx = args.context(&config);

    let store = FileTableStore::new(&config.storage.tables_dir).with_context(|| {
        format!("failed to open table store at {}", config.storage.tables_dir.display())
    })?;
    let audit = sink_from_name(&config.audit.sink, &config.audit.log_path);
    let runner = EntityJobRunner::new(
        ctx.clone(),
        Arc::new(store),
        audit,
        config.storage.landing_dir.clone(),
    );
    let backend = LocalBackend::new(runner);

    match Scheduler::new().run(&ctx, jobs, &backend).await {
        Ok(report) => {
            print_report(&config, &report)?;
            Ok(())
        }
        Err(SchedulerError::Failed(err)) => {
            print_report(&config, &err.report)?;
            error!(run_id = %ctx.run_id, failed = err.report.failed.len(), "run finished with failures");
            Err(err.into())
        }
        Err(e) => {
            error!(run_id = %ctx.run_id, error = %e, "run aborted");
            Err(anyhow::Error::new(e).context("run aborted"))
        }
    }
}

fn print_report(config: &Config, report: &RunReport) -> Result<()> {
    let out = serde_json::json!({ "config": config.summary(), "report": report });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
