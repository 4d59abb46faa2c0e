//! Engine assembly and lifecycle.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use checkpoints::{
    CheckpointStore, FileCheckpointStore, MemCheckpointStore,
    SqliteCheckpointStore,
};
use common::RetryPolicy;
use metrics::gauge;
use parking_lot::RwLock;
use rest_api::{EngineAPIError, EngineController, EngineInfo};
use tierforge_config::{CheckpointBackend, EngineSpec, SinkCfg};
use tierforge_core::{ArcDynTableStore, EngineError, EngineResult, OffsetTracker};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::coordinator::{Coordinator, SinkSlot};
use crate::reader::BatchReader;
use crate::status::{EngineState, EngineStatus};

pub const OFFSETS_FILE: &str = "offsets.json";
pub const OFFSETS_DB: &str = "offsets.db";

/// Open the offset store rooted at a sink's checkpoint location.
pub fn checkpoint_store(
    backend: CheckpointBackend,
    sink: &SinkCfg,
) -> Result<Arc<dyn CheckpointStore>> {
    let location = || {
        sink.checkpoint_location
            .as_deref()
            .map(Path::new)
            .with_context(|| format!("sink {} has no checkpoint_location", sink.id))
    };
    let store: Arc<dyn CheckpointStore> = match backend {
        CheckpointBackend::File => {
            Arc::new(FileCheckpointStore::new(location()?.join(OFFSETS_FILE))?)
        }
        CheckpointBackend::Sqlite => {
            Arc::new(SqliteCheckpointStore::new(location()?.join(OFFSETS_DB))?)
        }
        CheckpointBackend::Memory => Arc::new(MemCheckpointStore::new()?),
    };
    Ok(store)
}

/// Build the coordinator for `spec` over an already provisioned store.
pub async fn build_coordinator(
    spec: &EngineSpec,
    store: ArcDynTableStore,
    cancel: CancellationToken,
) -> Result<Coordinator> {
    spec.validate()?;
    let s = &spec.spec;

    let source_schema = store
        .schema(&s.source.table)
        .await
        .with_context(|| format!("resolving source table {}", s.source.table))?;

    let built = sinks::build_sinks(spec, store.clone(), &source_schema, cancel)?;
    let policy = RetryPolicy::from_millis(
        s.retry.initial_backoff_ms,
        s.retry.max_backoff_ms,
        None,
    );
    let checkpoint_timeout = Duration::from_millis(s.timeouts.checkpoint_ms);

    let mut slots = Vec::with_capacity(built.len());
    for (sink, cfg) in built.into_iter().zip(&s.sinks) {
        let offsets = checkpoint_store(s.checkpoint.backend, cfg)
            .with_context(|| format!("opening checkpoint store for sink {}", cfg.id))?;
        let tracker = OffsetTracker::new(offsets).with_timeout(checkpoint_timeout);
        slots.push(SinkSlot::new(sink, tracker, policy.clone()));
    }

    let reader = BatchReader::new(
        store,
        s.source.table.as_str(),
        s.max_commits_per_trigger,
        Duration::from_millis(s.timeouts.read_ms),
    );

    Ok(Coordinator::new(
        spec.name(),
        reader,
        slots,
        Duration::from_millis(s.trigger_interval_ms),
        s.worker_pool_size,
        policy,
    ))
}

/// A running engine.
pub struct EngineHandle {
    name: String,
    cancel: CancellationToken,
    status: watch::Receiver<EngineStatus>,
    join: Option<JoinHandle<EngineResult<()>>>,
}

impl EngineHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a stop and wait until in-flight commits have drained.
    pub async fn stop(&mut self) -> EngineResult<()> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the engine to finish on its own.
    pub async fn join(&mut self) -> EngineResult<()> {
        match self.join.take() {
            Some(join) => join
                .await
                .map_err(|e| EngineError::aborted(e.to_string()))?,
            None => Ok(()),
        }
    }
}

/// Build and start an engine on the current runtime.
pub async fn spawn_engine(
    spec: &EngineSpec,
    store: ArcDynTableStore,
) -> Result<EngineHandle> {
    let cancel = CancellationToken::new();
    let coordinator = build_coordinator(spec, store, cancel.clone()).await?;
    let status = coordinator.subscribe();

    let name = spec.name().to_string();
    let run_id = Uuid::new_v4();
    let span = info_span!("engine", engine = %name, %run_id);
    let task_cancel = cancel.clone();
    let engine = name.clone();
    let source = spec.spec.source.table.clone();
    let join = tokio::spawn(
        async move {
            info!(%source, "engine starting");
            gauge!("tierforge_engine_running", "engine" => engine.clone()).increment(1.0);
            let res = coordinator.run(task_cancel).await;
            gauge!("tierforge_engine_running", "engine" => engine).decrement(1.0);
            res
        }
        .instrument(span),
    );

    Ok(EngineHandle {
        name,
        cancel,
        status,
        join: Some(join),
    })
}

/// Running engines by name; backs the control API.
#[derive(Clone, Default)]
pub struct EngineManager {
    engines: Arc<RwLock<HashMap<String, EngineHandle>>>,
}

impl EngineManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: EngineHandle) -> Result<()> {
        let mut engines = self.engines.write();
        anyhow::ensure!(
            !engines.contains_key(handle.name()),
            "engine {} already running",
            handle.name()
        );
        engines.insert(handle.name().to_string(), handle);
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.engines.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn status(&self, name: &str) -> Option<EngineStatus> {
        self.engines.read().get(name).map(EngineHandle::status)
    }

    /// Resolves once every engine reached `Stopped`.
    pub async fn wait_all(&self) {
        let receivers: Vec<_> =
            self.engines.read().values().map(EngineHandle::subscribe).collect();
        for mut rx in receivers {
            let _ = rx.wait_for(|s| s.state == EngineState::Stopped).await;
        }
    }

    /// Stop one engine. The handle stays registered so its final status can
    /// still be inspected.
    pub async fn stop_engine(&self, name: &str) -> Option<EngineResult<()>> {
        let (cancel, join) = {
            let mut engines = self.engines.write();
            let handle = engines.get_mut(name)?;
            (handle.cancel_token(), handle.join.take())
        };
        cancel.cancel();
        let res = match join {
            Some(join) => join
                .await
                .unwrap_or_else(|e| Err(EngineError::aborted(e.to_string()))),
            None => Ok(()),
        };
        Some(res)
    }

    /// Stop every engine, returning the first failure.
    pub async fn shutdown(&self) -> Result<()> {
        let mut first_err = None;
        for name in self.names() {
            if let Some(Err(e)) = self.stop_engine(&name).await {
                warn!(engine = %name, error = %e, "engine finished with error");
                first_err.get_or_insert(anyhow::Error::new(e).context(format!("engine {name}")));
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl EngineController for EngineManager {
    async fn list(&self) -> Vec<EngineInfo> {
        let mut infos: Vec<_> = self
            .engines
            .read()
            .values()
            .map(|h| h.status().info())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    async fn get(&self, name: &str) -> Result<EngineInfo, EngineAPIError> {
        self.status(name)
            .map(|s| s.info())
            .ok_or_else(|| EngineAPIError::NotFound(name.to_string()))
    }

    async fn stop(&self, name: &str) -> Result<EngineInfo, EngineAPIError> {
        let status = self
            .status(name)
            .ok_or_else(|| EngineAPIError::NotFound(name.to_string()))?;
        if status.state == EngineState::Stopped {
            return Err(EngineAPIError::AlreadyStopped(name.to_string()));
        }

        info!(engine = name, "stop requested via api");
        if let Some(Err(e)) = self.stop_engine(name).await {
            warn!(engine = name, error = %e, "engine finished with error");
        }
        self.get(name).await
    }
}
