//! Durable per-(source, sink) consumption offsets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use checkpoints::{CheckpointStore, CheckpointStoreExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::offset::Offset;

/// Persisted form of one sink's progress through one source table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRecord {
    pub source: String,
    pub sink: String,
    pub offset: Offset,
    pub committed_at: DateTime<Utc>,
}

/// Store key of the offset record for `(source, sink)`.
pub fn offset_key(source: &str, sink: &str) -> String {
    format!("{sink}/{source}")
}

/// Reads and advances offsets in a checkpoint store.
///
/// Every failure of the backing store surfaces as
/// [`EngineError::Persistence`].
#[derive(Clone)]
pub struct OffsetTracker {
    store: Arc<dyn CheckpointStore>,
    timeout: Duration,
}

impl OffsetTracker {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Committed offset, or [`Offset::ZERO`] if none was ever recorded.
    pub async fn get(&self, source: &str, sink: &str) -> EngineResult<Offset> {
        Ok(self
            .record(source, sink)
            .await?
            .map_or(Offset::ZERO, |r| r.offset))
    }

    pub async fn record(
        &self,
        source: &str,
        sink: &str,
    ) -> EngineResult<Option<OffsetRecord>> {
        let key = offset_key(source, sink);
        let fut = self.store.get::<OffsetRecord>(&key);
        match timeout(self.timeout, fut).await {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(e)) => Err(EngineError::persistence(sink, e.to_string())),
            Err(_) => Err(EngineError::persistence(
                sink,
                format!("reading {key} timed out"),
            )),
        }
    }

    /// Durably advance the offset of `(source, sink)` to `offset`.
    ///
    /// Committing the current offset again is a no-op; moving backwards is
    /// refused.
    pub async fn commit(
        &self,
        source: &str,
        sink: &str,
        offset: Offset,
    ) -> EngineResult<()> {
        let current = self.get(source, sink).await?;
        if offset == current {
            return Ok(());
        }
        if offset < current {
            return Err(EngineError::persistence(
                sink,
                format!("refusing to move offset back from {current} to {offset}"),
            ));
        }

        let key = offset_key(source, sink);
        let record = OffsetRecord {
            source: source.to_string(),
            sink: sink.to_string(),
            offset,
            committed_at: Utc::now(),
        };
        match timeout(self.timeout, self.store.put(&key, record)).await {
            Ok(Ok(())) => {
                debug!(sink, source, %offset, "offset committed");
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::persistence(sink, e.to_string())),
            Err(_) => Err(EngineError::persistence(
                sink,
                format!("writing {key} timed out"),
            )),
        }
    }
}
