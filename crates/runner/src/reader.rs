//! Batch Reader: one bounded read of the source table per trigger.

use std::time::Duration;

use common::{RetryOutcome, watchdog};
use tierforge_core::{ArcDynTableStore, Batch, EngineError, EngineResult, Offset};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct BatchReader {
    store: ArcDynTableStore,
    source: String,
    max_commits: Option<usize>,
    timeout: Duration,
}

impl BatchReader {
    pub fn new(
        store: ArcDynTableStore,
        source: impl Into<String>,
        max_commits: Option<usize>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            source: source.into(),
            max_commits,
            timeout,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Rows committed strictly after `since`, in commit order.
    ///
    /// Nothing new yields an empty batch ending at `since`. Returns `None`
    /// when `cancel` fires before the read completes.
    pub async fn read(
        &self,
        since: Offset,
        cancel: &CancellationToken,
    ) -> EngineResult<Option<Batch>> {
        let read = self.store.read_since(&self.source, since, self.max_commits);
        match watchdog(read, self.timeout, cancel, "source_read").await {
            Ok(r) => {
                let batch = Batch::new(self.source.as_str(), since, r.new_offset, r.commits);
                debug!(
                    source = %self.source,
                    since = %since,
                    end = %batch.end(),
                    rows = batch.row_count(),
                    "batch read"
                );
                Ok(Some(batch))
            }
            Err(RetryOutcome::Cancelled) => Ok(None),
            Err(RetryOutcome::Timeout { action }) => Err(
                EngineError::source_unavailable(&self.source, format!("{action} timed out")),
            ),
            Err(RetryOutcome::Failed(e)) => {
                Err(EngineError::source_unavailable(&self.source, e.to_string()))
            }
            Err(RetryOutcome::Exhausted { last_error, .. }) => Err(
                EngineError::source_unavailable(&self.source, last_error.to_string()),
            ),
        }
    }
}
