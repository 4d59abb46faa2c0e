use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use walkdir::WalkDir;

mod sinks_cfg;
mod tables_cfg;

pub use sinks_cfg::{ColumnMap, ProjectionCfg, SinkCfg, SlotCfg};
pub use tables_cfg::TableCfg;

/// Upper bound for `trigger_interval_ms` (one day).
pub const MAX_TRIGGER_INTERVAL_MS: u64 = 86_400_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("expanding environment in {path}: {details}")]
    Env { path: PathBuf, details: String },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("engine {engine}: {details}")]
    Invalid { engine: String, details: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSpec {
    #[serde(default, rename = "apiVersion")]
    pub api_version: Option<String>,

    #[serde(default)]
    pub kind: Option<String>,

    pub metadata: Metadata,

    pub spec: Spec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// Engine name (unique)
    pub name: String,

    /// Business oriented tenant identifier
    #[serde(default)]
    pub tenant: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    /// Raw table every sink consumes.
    pub source: SourceCfg,

    /// Micro-batch cadence. `0` runs triggers back to back.
    #[serde(
        default = "default_trigger_interval_ms",
        alias = "triggerIntervalMillis"
    )]
    pub trigger_interval_ms: u64,

    /// Read at most this many source commits per trigger.
    #[serde(default, alias = "maxCommitsPerTrigger")]
    pub max_commits_per_trigger: Option<usize>,

    #[serde(default, alias = "outputMode")]
    pub output_mode: OutputMode,

    /// Concurrent per-sink tasks within one trigger.
    #[serde(default = "default_worker_pool_size", alias = "workerPoolSize")]
    pub worker_pool_size: usize,

    #[serde(default)]
    pub checkpoint: CheckpointCfg,

    #[serde(default)]
    pub store: StoreCfg,

    /// Tables provisioned (idempotently) before the engine starts.
    #[serde(default)]
    pub tables: Vec<TableCfg>,

    /// Sink registry.
    #[serde(default)]
    pub sinks: Vec<SinkCfg>,

    #[serde(default)]
    pub retry: RetryCfg,

    #[serde(default)]
    pub timeouts: TimeoutsCfg,
}

fn default_trigger_interval_ms() -> u64 {
    100
}

fn default_worker_pool_size() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceCfg {
    pub table: String,
}

/// Only appends are propagated to sinks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Append,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    /// `offsets.json` under each sink's checkpoint location.
    #[default]
    File,
    /// `offsets.db` under each sink's checkpoint location.
    Sqlite,
    /// Process memory; offsets are lost on restart.
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointCfg {
    pub backend: CheckpointBackend,
}

/// Table Store adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreCfg {
    #[default]
    Memory,
    File {
        root: String,
    },
}

/// Backoff for transient failures of the reader and of each sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryCfg {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Retries after the first commit attempt; `0` disables retrying and
    /// `None` retries until stopped.
    pub max_retries: Option<u32>,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            max_retries: Some(5),
        }
    }
}

/// Bounded waits for every I/O operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsCfg {
    pub read_ms: u64,
    pub commit_ms: u64,
    pub checkpoint_ms: u64,
}

impl Default for TimeoutsCfg {
    fn default() -> Self {
        Self {
            read_ms: 30_000,
            commit_ms: 30_000,
            checkpoint_ms: 10_000,
        }
    }
}

impl EngineSpec {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |details: String| ConfigError::Invalid {
            engine: self.metadata.name.clone(),
            details,
        };
        let spec = &self.spec;

        if self.metadata.name.trim().is_empty() {
            return Err(invalid("metadata.name must not be empty".into()));
        }
        if spec.source.table.trim().is_empty() {
            return Err(invalid("source.table must not be empty".into()));
        }
        if spec.trigger_interval_ms > MAX_TRIGGER_INTERVAL_MS {
            return Err(invalid(format!(
                "trigger_interval_ms {} exceeds {MAX_TRIGGER_INTERVAL_MS}",
                spec.trigger_interval_ms
            )));
        }
        if spec.worker_pool_size == 0 {
            return Err(invalid("worker_pool_size must be at least 1".into()));
        }
        if spec.max_commits_per_trigger == Some(0) {
            return Err(invalid(
                "max_commits_per_trigger must be at least 1".into(),
            ));
        }
        if spec.retry.initial_backoff_ms == 0 {
            return Err(invalid("retry.initial_backoff_ms must be positive".into()));
        }
        if spec.timeouts.read_ms == 0
            || spec.timeouts.commit_ms == 0
            || spec.timeouts.checkpoint_ms == 0
        {
            return Err(invalid("timeouts must be positive".into()));
        }
        if let StoreCfg::File { root } = &spec.store {
            if root.trim().is_empty() {
                return Err(invalid("store.root must not be empty".into()));
            }
        }

        let mut tables = HashSet::new();
        for t in &spec.tables {
            if !tables.insert(t.name.as_str()) {
                return Err(invalid(format!("table {} declared twice", t.name)));
            }
            t.definition()
                .map_err(|e| invalid(format!("table {}: {e}", t.name)))?;
        }

        if spec.sinks.is_empty() {
            return Err(invalid("at least one sink is required".into()));
        }

        let mut ids = HashSet::new();
        let mut targets = HashSet::new();
        for s in &spec.sinks {
            if s.id.trim().is_empty() {
                return Err(invalid("sink id must not be empty".into()));
            }
            if !ids.insert(s.id.as_str()) {
                return Err(invalid(format!("duplicate sink id {}", s.id)));
            }
            if s.target == spec.source.table {
                return Err(invalid(format!(
                    "sink {} targets the source table",
                    s.id
                )));
            }
            if !targets.insert(s.target.as_str()) {
                return Err(invalid(format!(
                    "sink {} shares target {} with another sink",
                    s.id, s.target
                )));
            }
            if spec.checkpoint.backend != CheckpointBackend::Memory
                && s
                    .checkpoint_location
                    .as_deref()
                    .is_none_or(|l| l.trim().is_empty())
            {
                return Err(invalid(format!(
                    "sink {} has no checkpoint_location",
                    s.id
                )));
            }
            validate_projection(&s.projection)
                .map_err(|d| invalid(format!("sink {}: {d}", s.id)))?;
        }

        Ok(())
    }
}

fn validate_projection(p: &ProjectionCfg) -> Result<(), String> {
    match p {
        ProjectionCfg::Select { columns } => {
            if columns.is_empty() {
                return Err("select needs at least one column".into());
            }
            unique_targets(columns.iter().map(ColumnMap::target))
        }
        ProjectionCfg::Split {
            key_column,
            parent,
            slots,
        } => {
            if slots.is_empty() {
                return Err("split needs at least one slot".into());
            }
            for (i, slot) in slots.iter().enumerate() {
                if slot.columns.is_empty() {
                    return Err(format!("split slot {i} has no columns"));
                }
                let names = [key_column.as_str(), parent.target()]
                    .into_iter()
                    .chain(slot.columns.iter().map(ColumnMap::target));
                unique_targets(names)?;
            }
            Ok(())
        }
    }
}

fn unique_targets<'a>(
    names: impl Iterator<Item = &'a str>,
) -> Result<(), String> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n) {
            return Err(format!("output column {n} appears twice"));
        }
    }
    Ok(())
}

pub fn load_from_path(file_path: impl AsRef<Path>) -> Result<EngineSpec, ConfigError> {
    let path = file_path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let with_env =
        shellexpand::env(&raw).map_err(|e| ConfigError::Env {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
    let spec: EngineSpec =
        serde_yaml::from_str(&with_env).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    spec.validate()?;
    debug!(engine = %spec.metadata.name, path = %path.display(), "engine spec loaded");
    Ok(spec)
}

pub fn load_from_dir(dir_path: impl AsRef<Path>) -> Result<Vec<EngineSpec>, ConfigError> {
    let mut specs = Vec::<EngineSpec>::new();
    let mut entries: Vec<PathBuf> = WalkDir::new(dir_path.as_ref())
        .into_iter()
        .filter_map(|e| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!(error = %err, "skipping unreadable entry in config dir");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            matches!(
                p.extension().and_then(|x| x.to_str()),
                Some("yaml" | "yml")
            )
        })
        .collect();
    entries.sort();

    let mut names = HashSet::new();
    for path in entries {
        let spec = load_from_path(&path)?;
        if !names.insert(spec.metadata.name.clone()) {
            return Err(ConfigError::Invalid {
                engine: spec.metadata.name,
                details: format!("engine name reused in {}", path.display()),
            });
        }
        specs.push(spec);
    }

    Ok(specs)
}

pub fn load_cfg(path: impl AsRef<Path>) -> Result<Vec<EngineSpec>, ConfigError> {
    let cfg_path = path.as_ref();

    match cfg_path.is_dir() {
        true => load_from_dir(cfg_path),
        false => {
            let spec = load_from_path(cfg_path)?;
            Ok(vec![spec])
        }
    }
}
