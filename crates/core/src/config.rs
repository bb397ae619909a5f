use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerSettings,
    pub storage: StorageConfig,
    pub audit: AuditConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `FMD_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("FMD_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let storage = StorageConfig::from_env_profiled(p);
        Self {
            profile: p.to_string(),
            scheduler: SchedulerSettings::from_env_profiled(p),
            audit: AuditConfig::from_env_profiled(p, &storage),
            storage,
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   max_concurrency={}, step_timeout={}s, retries={}, batch_timeout={}s",
            self.scheduler.max_concurrency,
            self.scheduler.step_timeout_secs,
            self.scheduler.retry_count,
            self.scheduler.batch_timeout_secs
        );
        tracing::info!(
            "  storage:     data_dir={}, landing={}, tables={}",
            self.storage.data_dir.display(),
            self.storage.landing_dir.display(),
            self.storage.tables_dir.display()
        );
        tracing::info!("  audit:       sink={}, path={}", self.audit.sink, self.audit.log_path.display());
    }

    /// Summary safe to embed in run reports.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "scheduler": {
                "max_concurrency": self.scheduler.max_concurrency,
                "step_timeout_secs": self.scheduler.step_timeout_secs,
                "retry_count": self.scheduler.retry_count,
                "batch_timeout_secs": self.scheduler.batch_timeout_secs,
            },
            "storage": {
                "data_dir": self.storage.data_dir,
                "landing_dir": self.storage.landing_dir,
                "tables_dir": self.storage.tables_dir,
            },
            "audit": { "sink": self.audit.sink },
        })
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Ceiling imposed by the backend's batch-run primitive.
    pub max_concurrency: usize,
    pub step_timeout_secs: u64,
    pub retry_count: u32,
    pub retry_interval_secs: u64,
    pub batch_timeout_secs: u64,
}

impl SchedulerSettings {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_concurrency: profiled_env_usize(p, "FMD_MAX_CONCURRENCY", 50),
            step_timeout_secs: profiled_env_u64(p, "FMD_STEP_TIMEOUT_SECS", 600),
            retry_count: profiled_env_u32(p, "FMD_RETRY_COUNT", 2),
            retry_interval_secs: profiled_env_u64(p, "FMD_RETRY_INTERVAL_SECS", 0),
            batch_timeout_secs: profiled_env_u64(p, "FMD_BATCH_TIMEOUT_SECS", 7200),
        }
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Where landing-zone source files are read from.
    pub landing_dir: PathBuf,
    /// Root of the file-backed versioned table store.
    pub tables_dir: PathBuf,
}

impl StorageConfig {
    fn from_env_profiled(p: &str) -> Self {
        let data_dir = PathBuf::from(profiled_env_or(p, "DATA_DIR", "data"));
        Self::with_overrides(
            data_dir,
            profiled_env_opt(p, "LANDING_DIR").map(PathBuf::from),
            profiled_env_opt(p, "TABLES_DIR").map(PathBuf::from),
        )
    }

    /// Derive landing/tables directories from `data_dir` unless given.
    pub fn with_overrides(
        data_dir: PathBuf,
        landing_dir: Option<PathBuf>,
        tables_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            landing_dir: landing_dir.unwrap_or_else(|| data_dir.join("landing")),
            tables_dir: tables_dir.unwrap_or_else(|| data_dir.join("tables")),
            data_dir,
        }
    }
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// "tracing", "jsonl", "memory"
    pub sink: String,
    pub log_path: PathBuf,
}

impl AuditConfig {
    fn from_env_profiled(p: &str, storage: &StorageConfig) -> Self {
        let default_path = storage.data_dir.join("audit").join("jobs.jsonl");
        Self {
            sink: profiled_env_or(p, "AUDIT_SINK", "tracing"),
            log_path: profiled_env_opt(p, "AUDIT_LOG_PATH")
                .map(PathBuf::from)
                .unwrap_or(default_path),
        }
    }
}
