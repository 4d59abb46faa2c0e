use std::borrow::Cow;
use std::io;

use common::Retryable;
use thiserror::Error;

use crate::value::FieldType;

/// Invalid schema or partition definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("duplicate field id {id}")]
    DuplicateId { id: u32 },

    #[error("duplicate field name '{name}'")]
    DuplicateName { name: String },

    #[error("unknown column '{name}'")]
    UnknownColumn { name: String },

    #[error("bucket count for '{column}' must be at least 1")]
    InvalidBucket { column: String },

    #[error("column '{column}' must be an integer key")]
    IntegerKey { column: String },

    #[error("invalid partition transform '{0}'")]
    InvalidTransform(String),
}

/// A row that does not conform to its table schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("missing field '{field}'")]
    MissingField { field: String },

    #[error("unexpected field '{field}'")]
    UnexpectedField { field: String },

    #[error("field '{found}' at position {position}, expected '{expected}'")]
    FieldOrder {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: FieldType,
    },

    #[error("required field '{field}' is null")]
    NullRequired { field: String },
}

/// Table Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table store unavailable: {details}")]
    Unavailable { details: Cow<'static, str> },

    #[error("table not found: {table}")]
    TableNotFound { table: String },

    #[error("schema conflict on {table}: {details}")]
    SchemaConflict {
        table: String,
        details: Cow<'static, str>,
    },

    #[error("row {index} rejected by {table}: {violation}")]
    SchemaViolation {
        table: String,
        index: usize,
        violation: SchemaViolation,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),

    #[error("timeout during {action}")]
    Timeout { action: Cow<'static, str> },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn unavailable(details: impl Into<Cow<'static, str>>) -> Self {
        StoreError::Unavailable {
            details: details.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Unavailable { .. } => "unavailable",
            StoreError::TableNotFound { .. } => "table_not_found",
            StoreError::SchemaConflict { .. } => "schema_conflict",
            StoreError::SchemaViolation { .. } => "schema_violation",
            StoreError::InvalidSchema(_) => "invalid_schema",
            StoreError::Timeout { .. } => "timeout",
            StoreError::Io(_) => "io",
            StoreError::Serialization(_) => "serialization",
            StoreError::Other(_) => "other",
        }
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. }
                | StoreError::Timeout { .. }
                | StoreError::Io(_)
        )
    }
}

/// Sink writer failures.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("target store error: {0}")]
    Store(#[from] StoreError),

    #[error("row {index} for {table}: {violation}")]
    SchemaViolation {
        table: String,
        index: usize,
        violation: SchemaViolation,
    },

    #[error("projection emitted row for '{table}', sink writes '{target}'")]
    Routing { table: String, target: String },

    #[error("sink not opened")]
    NotOpened,

    #[error("commit {action} timed out")]
    Timeout { action: Cow<'static, str> },

    #[error("commit cancelled")]
    Cancelled,
}

impl SinkError {
    /// Projection or schema bugs that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        match self {
            SinkError::SchemaViolation { .. } | SinkError::Routing { .. } => {
                true
            }
            SinkError::Store(e) => matches!(
                e,
                StoreError::SchemaViolation { .. }
                    | StoreError::SchemaConflict { .. }
            ),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SinkError::Store(e) => e.kind(),
            SinkError::SchemaViolation { .. } => "schema_violation",
            SinkError::Routing { .. } => "routing",
            SinkError::NotOpened => "not_opened",
            SinkError::Timeout { .. } => "timeout",
            SinkError::Cancelled => "cancelled",
        }
    }
}

impl Retryable for SinkError {
    fn is_retryable(&self) -> bool {
        match self {
            SinkError::Store(e) => e.is_retryable(),
            SinkError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Engine-level failure taxonomy.
///
/// Transient errors are retried on a later trigger; the others stop either a
/// single sink (`SchemaViolation`) or the whole engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("source table {table} unavailable: {details}")]
    SourceUnavailable {
        table: String,
        details: Cow<'static, str>,
    },

    #[error("sink {sink} write failed: {details}")]
    SinkWrite {
        sink: String,
        retryable: bool,
        details: Cow<'static, str>,
    },

    #[error("sink {sink} produced a non-conforming row: {details}")]
    SchemaViolation {
        sink: String,
        details: Cow<'static, str>,
    },

    #[error("offset persistence failed for {sink}: {details}")]
    Persistence {
        sink: String,
        details: Cow<'static, str>,
    },

    #[error("configuration error: {details}")]
    Configuration { details: Cow<'static, str> },

    #[error("no active sinks remain")]
    NoActiveSinks,

    #[error("engine task aborted: {details}")]
    Aborted { details: Cow<'static, str> },
}

impl EngineError {
    pub fn source_unavailable(
        table: impl Into<String>,
        details: impl Into<Cow<'static, str>>,
    ) -> Self {
        EngineError::SourceUnavailable {
            table: table.into(),
            details: details.into(),
        }
    }

    pub fn persistence(
        sink: impl Into<String>,
        details: impl Into<Cow<'static, str>>,
    ) -> Self {
        EngineError::Persistence {
            sink: sink.into(),
            details: details.into(),
        }
    }

    pub fn configuration(details: impl Into<Cow<'static, str>>) -> Self {
        EngineError::Configuration {
            details: details.into(),
        }
    }

    pub fn aborted(details: impl Into<Cow<'static, str>>) -> Self {
        EngineError::Aborted {
            details: details.into(),
        }
    }

    /// Classify a sink failure.
    pub fn from_sink(sink: &str, err: SinkError) -> Self {
        if err.is_fatal() {
            EngineError::SchemaViolation {
                sink: sink.to_string(),
                details: err.to_string().into(),
            }
        } else {
            EngineError::SinkWrite {
                sink: sink.to_string(),
                retryable: !matches!(err, SinkError::NotOpened),
                details: err.to_string().into(),
            }
        }
    }

    /// Retried on a later trigger.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::SourceUnavailable { .. }
                | EngineError::SinkWrite {
                    retryable: true,
                    ..
                }
        )
    }

    /// Stops the whole engine rather than a single sink.
    pub fn is_engine_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Persistence { .. }
                | EngineError::Configuration { .. }
                | EngineError::NoActiveSinks
                | EngineError::Aborted { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::SourceUnavailable { .. } => "source_unavailable",
            EngineError::SinkWrite { .. } => "sink_write",
            EngineError::SchemaViolation { .. } => "schema_violation",
            EngineError::Persistence { .. } => "persistence",
            EngineError::Configuration { .. } => "configuration",
            EngineError::NoActiveSinks => "no_active_sinks",
            EngineError::Aborted { .. } => "aborted",
        }
    }
}

impl Retryable for EngineError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type SinkResult<T> = std::result::Result<T, SinkError>;
pub type EngineResult<T> = std::result::Result<T, EngineError>;
