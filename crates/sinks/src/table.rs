//! Sink writer committing projected rows to a Table Store table.
//!
//! Each commit carries a [`CommitToken`] of `(sink id, batch end)`, which the
//! store uses to drop replays of a range it already accepted. Together with
//! [`reconcile`](Sink::reconcile) this makes re-delivering a batch after a
//! crash between the table commit and the offset commit harmless.

use std::time::Duration;

use async_trait::async_trait;
use common::{RetryOutcome, RetryPolicy, retry_async};
use parking_lot::RwLock;
use tierforge_core::{
    ArcDynRule, ArcDynTableStore, Batch, CommitResult, CommitToken, Row,
    Schema, Sink, SinkError, SinkResult, StoreError,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TableSink {
    id: String,
    target: String,
    store: ArcDynTableStore,
    rule: ArcDynRule,
    /// Target schema, resolved by `open`.
    schema: RwLock<Option<Schema>>,
    policy: RetryPolicy,
    commit_timeout: Duration,
    cancel: CancellationToken,
}

impl TableSink {
    pub fn new(
        id: impl Into<String>,
        store: ArcDynTableStore,
        rule: ArcDynRule,
    ) -> Self {
        Self {
            id: id.into(),
            target: rule.target().to_string(),
            store,
            rule,
            schema: RwLock::new(None),
            policy: RetryPolicy::default(),
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Token observed between commit attempts. An attempt already running is
    /// never interrupted.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn rule(&self) -> &ArcDynRule {
        &self.rule
    }
}

#[async_trait]
impl Sink for TableSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn open(&self) -> SinkResult<()> {
        let schema = self.store.schema(&self.target).await?;
        debug!(sink = %self.id, target = %self.target, fields = schema.len(), "sink opened");
        *self.schema.write() = Some(schema);
        Ok(())
    }

    async fn reconcile(&self, batch: Batch) -> SinkResult<Batch> {
        let watermark = self.store.writer_watermark(&self.target, &self.id).await?;
        match watermark {
            Some(w) if w > batch.start() => {
                info!(
                    sink = %self.id,
                    watermark = %w,
                    start = %batch.start(),
                    "target already holds part of this range, skipping it"
                );
                Ok(batch.after(w))
            }
            _ => Ok(batch),
        }
    }

    fn apply(&self, batch: &Batch) -> SinkResult<Vec<Row>> {
        let guard = self.schema.read();
        let schema = guard.as_ref().ok_or(SinkError::NotOpened)?;

        let mut rows = Vec::new();
        for projected in self.rule.project_batch(batch) {
            if *projected.table != *self.target {
                return Err(SinkError::Routing {
                    table: projected.table.to_string(),
                    target: self.target.clone(),
                });
            }
            schema.validate(&projected.row).map_err(|violation| {
                SinkError::SchemaViolation {
                    table: self.target.clone(),
                    index: rows.len(),
                    violation,
                }
            })?;
            rows.push(projected.row);
        }
        Ok(rows)
    }

    #[instrument(skip_all, fields(sink = %self.id, end = %batch.end()))]
    async fn commit(
        &self,
        batch: &Batch,
        rows: Vec<Row>,
    ) -> SinkResult<CommitResult> {
        if rows.is_empty() {
            return Ok(CommitResult {
                commit: None,
                rows: 0,
                deduplicated: false,
                end: batch.end(),
            });
        }

        let token = CommitToken::new(self.id.as_str(), batch.end());
        let result = retry_async(
            |attempt| {
                let rows = rows.clone();
                let token = token.clone();
                async move {
                    debug!(attempt, rows = rows.len(), "appending to target");
                    self.store.append_rows(&self.target, rows, Some(token)).await
                }
            },
            |e: &StoreError| common::Retryable::is_retryable(e),
            self.commit_timeout,
            self.policy.clone(),
            &self.cancel,
            "sink_commit",
        )
        .await;

        match result {
            Ok(outcome) => Ok(CommitResult {
                commit: outcome.commit,
                rows: outcome.rows,
                deduplicated: outcome.deduplicated,
                end: batch.end(),
            }),
            Err(RetryOutcome::Cancelled) => Err(SinkError::Cancelled),
            Err(RetryOutcome::Timeout { action }) => {
                Err(SinkError::Timeout { action })
            }
            Err(RetryOutcome::Exhausted { last_error, .. }) => {
                Err(SinkError::Store(last_error))
            }
            Err(RetryOutcome::Failed(e)) => Err(SinkError::Store(e)),
        }
    }
}
