//! Tierforge Core Types
//!
//! Data model and component contracts for incremental table normalization:
//! a wide raw (bronze) table is read commit by commit and projected into
//! narrower curated (silver) tables by independently checkpointed sinks.

use std::sync::Arc;

use async_trait::async_trait;

pub mod batch;
pub mod errors;
pub mod offset;
pub mod offsets;
pub mod partition;
pub mod row;
pub mod schema;
pub mod value;

pub use batch::{Batch, CommitSlice};
pub use errors::{
    EngineError, EngineResult, SchemaError, SchemaViolation, SinkError,
    SinkResult, StoreError, StoreResult,
};
pub use offset::{CommitId, CommitToken, Offset};
pub use offsets::{OffsetRecord, OffsetTracker, offset_key};
pub use partition::{PartitionField, PartitionSpec, Transform};
pub use row::Row;
pub use schema::{Field, Schema};
pub use value::{FieldType, Value};

// ============================================================================
// Table Store
// ============================================================================

/// Result of an append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Commit created by this append; `None` when nothing was written.
    pub commit: Option<CommitId>,
    pub rows: usize,
    /// The token had already been applied, so the rows were not written again.
    pub deduplicated: bool,
}

/// Result of [`TableStore::read_since`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    pub commits: Vec<CommitSlice>,
    /// Id of the last returned commit, or the requested offset if none.
    pub new_offset: Offset,
}

/// Append-only table storage.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Create a table. Idempotent for an identical schema and partition
    /// spec; any difference fails with [`StoreError::SchemaConflict`].
    async fn create_table(
        &self,
        name: &str,
        schema: Schema,
        spec: PartitionSpec,
    ) -> StoreResult<()>;

    /// Atomically append `rows` as one commit.
    ///
    /// Every row is validated first; a single non-conforming row rejects the
    /// whole append. Durable once this returns.
    async fn append_rows(
        &self,
        name: &str,
        rows: Vec<Row>,
        token: Option<CommitToken>,
    ) -> StoreResult<AppendOutcome>;

    /// Whole commits strictly after `since`, in commit order. At most
    /// `max_commits` are returned when a limit is given.
    async fn read_since(
        &self,
        name: &str,
        since: Offset,
        max_commits: Option<usize>,
    ) -> StoreResult<ReadResult>;

    /// Lifecycle tooling only; the engine never drops tables.
    async fn drop_table(&self, name: &str) -> StoreResult<bool>;

    async fn schema(&self, name: &str) -> StoreResult<Schema>;

    async fn partition_spec(&self, name: &str) -> StoreResult<PartitionSpec>;

    /// Highest `source_end` accepted from `writer`.
    async fn writer_watermark(
        &self,
        name: &str,
        writer: &str,
    ) -> StoreResult<Option<Offset>>;

    /// Latest commit of the table, as an offset.
    async fn head(&self, name: &str) -> StoreResult<Offset>;

    async fn list_tables(&self) -> StoreResult<Vec<String>>;

    /// Every visible row, in commit order.
    async fn scan(&self, name: &str) -> StoreResult<Vec<Row>> {
        let read = self.read_since(name, Offset::ZERO, None).await?;
        Ok(read.commits.into_iter().flat_map(|c| c.rows).collect())
    }
}

// ============================================================================
// Projection Rule
// ============================================================================

/// One output row of a projection, addressed to a target table.
#[derive(Debug, Clone, PartialEq)]
pub struct Projected {
    pub table: Arc<str>,
    pub row: Row,
}

/// Pure mapping from a source row to target rows.
///
/// Implementations hold no state between calls, so projecting the same row
/// twice yields the same output. Projection is total: any row that conforms
/// to the source schema maps to a (possibly empty) output.
pub trait ProjectionRule: Send + Sync {
    /// Rule kind, e.g. `select`.
    fn kind(&self) -> &'static str;

    /// Table the rule emits into.
    fn target(&self) -> &str;

    /// Check that every column the rule reads exists in `source`.
    fn check_source(&self, source: &Schema) -> Result<(), SchemaError>;

    fn project(&self, row: &Row) -> Vec<Projected>;

    fn project_batch(&self, batch: &Batch) -> Vec<Projected> {
        batch.rows().flat_map(|row| self.project(row)).collect()
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Result of a sink commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub commit: Option<CommitId>,
    pub rows: usize,
    pub deduplicated: bool,
    /// Source offset the sink may now record.
    pub end: Offset,
}

/// A Sink Writer: applies one projection rule to a batch and commits the
/// output to one target table.
#[async_trait]
pub trait Sink: Send + Sync {
    fn id(&self) -> &str;

    fn target(&self) -> &str;

    /// Resolve the target table. Must succeed before `apply`.
    async fn open(&self) -> SinkResult<()>;

    /// Skip the part of `batch` this sink already committed to its target.
    ///
    /// Covers a crash between the target commit and the offset commit.
    async fn reconcile(&self, batch: Batch) -> SinkResult<Batch>;

    /// Project the batch and validate the output. Never touches storage.
    fn apply(&self, batch: &Batch) -> SinkResult<Vec<Row>>;

    /// Atomically commit `rows` for `batch`. Safe to repeat for the same
    /// batch.
    async fn commit(
        &self,
        batch: &Batch,
        rows: Vec<Row>,
    ) -> SinkResult<CommitResult>;
}

pub type ArcDynTableStore = Arc<dyn TableStore>;
pub type ArcDynRule = Arc<dyn ProjectionRule>;
pub type ArcDynSink = Arc<dyn Sink>;
