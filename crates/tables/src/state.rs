//! Storage-independent table bookkeeping shared by the adapters.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tierforge_core::{
    AppendOutcome, CommitId, CommitSlice, CommitToken, Offset, PartitionSpec,
    ReadResult, Row, Schema, StoreError, StoreResult,
};

/// Persisted table definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub schema: Schema,
    pub partition_spec: PartitionSpec,
}

/// One committed append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub id: CommitId,
    pub committed_at: DateTime<Utc>,
    #[serde(default)]
    pub token: Option<CommitToken>,
    /// Row count per partition path.
    pub partitions: BTreeMap<String, usize>,
    pub rows: Vec<Row>,
}

/// What an append resolves to before anything is written.
pub enum Pending {
    Skip(AppendOutcome),
    Write(CommitRecord),
}

#[derive(Debug, Clone)]
pub struct TableState {
    pub meta: TableMeta,
    commits: Vec<CommitRecord>,
    watermarks: HashMap<String, Offset>,
}

impl TableState {
    pub fn new(meta: TableMeta) -> Self {
        Self {
            meta,
            commits: Vec::new(),
            watermarks: HashMap::new(),
        }
    }

    /// Rebuild from persisted commits, which must be sorted by id.
    pub fn restore(meta: TableMeta, commits: Vec<CommitRecord>) -> Self {
        let mut state = Self::new(meta);
        for c in commits {
            state.apply(c);
        }
        state
    }

    pub fn check_definition(
        &self,
        name: &str,
        schema: &Schema,
        spec: &PartitionSpec,
    ) -> StoreResult<()> {
        if &self.meta.schema != schema {
            return Err(StoreError::SchemaConflict {
                table: name.to_string(),
                details: "table exists with a different schema".into(),
            });
        }
        if &self.meta.partition_spec != spec {
            return Err(StoreError::SchemaConflict {
                table: name.to_string(),
                details: "table exists with a different partition spec".into(),
            });
        }
        Ok(())
    }

    pub fn head(&self) -> Offset {
        self.commits.last().map_or(Offset::ZERO, |c| c.id.into())
    }

    pub fn watermark(&self, writer: &str) -> Option<Offset> {
        self.watermarks.get(writer).copied()
    }

    /// Validate `rows` and decide whether the append writes anything.
    pub fn prepare(
        &self,
        name: &str,
        rows: Vec<Row>,
        token: Option<CommitToken>,
    ) -> StoreResult<Pending> {
        if let Some(t) = &token {
            if self.watermark(&t.writer).is_some_and(|w| t.source_end <= w) {
                return Ok(Pending::Skip(AppendOutcome {
                    commit: None,
                    rows: rows.len(),
                    deduplicated: true,
                }));
            }
        }

        if rows.is_empty() {
            return Ok(Pending::Skip(AppendOutcome {
                commit: None,
                rows: 0,
                deduplicated: false,
            }));
        }

        let mut partitions = BTreeMap::new();
        for (index, row) in rows.iter().enumerate() {
            self.meta.schema.validate(row).map_err(|violation| {
                StoreError::SchemaViolation {
                    table: name.to_string(),
                    index,
                    violation,
                }
            })?;
            *partitions
                .entry(self.meta.partition_spec.partition_path(row))
                .or_insert(0) += 1;
        }

        Ok(Pending::Write(CommitRecord {
            id: CommitId(self.head().0 + 1),
            committed_at: Utc::now(),
            token,
            partitions,
            rows,
        }))
    }

    pub fn apply(&mut self, record: CommitRecord) {
        if let Some(t) = &record.token {
            let w = self.watermarks.entry(t.writer.clone()).or_default();
            *w = (*w).max(t.source_end);
        }
        self.commits.push(record);
    }

    pub fn read_since(&self, since: Offset, max_commits: Option<usize>) -> ReadResult {
        let first = self.commits.partition_point(|c| !since.precedes(c.id));
        let commits: Vec<CommitSlice> = self.commits[first..]
            .iter()
            .take(max_commits.unwrap_or(usize::MAX))
            .map(|c| CommitSlice {
                commit: c.id,
                rows: c.rows.clone(),
            })
            .collect();
        let new_offset = commits.last().map_or(since, |c| c.commit.into());
        ReadResult {
            commits,
            new_offset,
        }
    }

    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }
}
