use std::sync::Arc;

use crate::offset::{CommitId, Offset};
use crate::row::Row;

/// Rows of one source commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSlice {
    pub commit: CommitId,
    pub rows: Vec<Row>,
}

/// Immutable rows read from a source table between two offsets
/// (exclusive start, inclusive end), grouped by commit in commit order.
///
/// Cloning is cheap: commits are shared. Per-sink views created with
/// [`after`](Self::after) share the same storage.
#[derive(Debug, Clone)]
pub struct Batch {
    source: Arc<str>,
    start: Offset,
    end: Offset,
    commits: Arc<[CommitSlice]>,
    from: usize,
}

impl Batch {
    pub fn new(
        source: impl Into<Arc<str>>,
        start: Offset,
        end: Offset,
        commits: Vec<CommitSlice>,
    ) -> Self {
        Self {
            source: source.into(),
            start,
            end: end.max(start),
            commits: commits.into(),
            from: 0,
        }
    }

    pub fn empty(source: impl Into<Arc<str>>, at: Offset) -> Self {
        Self::new(source, at, at, Vec::new())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn start(&self) -> Offset {
        self.start
    }

    pub fn end(&self) -> Offset {
        self.end
    }

    pub fn commits(&self) -> &[CommitSlice] {
        &self.commits[self.from..]
    }

    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.commits().iter().flat_map(|c| c.rows.iter())
    }

    pub fn row_count(&self) -> usize {
        self.commits().iter().map(|c| c.rows.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// `true` when committing this batch would advance an offset.
    pub fn has_progress(&self) -> bool {
        self.end > self.start
    }

    /// View of this batch strictly after `offset`.
    ///
    /// A sink whose offset is at or past `end` gets an empty view that makes
    /// no progress.
    pub fn after(&self, offset: Offset) -> Batch {
        if offset <= self.start {
            return self.clone();
        }
        let skip = self.commits().partition_point(|c| !offset.precedes(c.commit));
        Batch {
            source: self.source.clone(),
            start: offset.min(self.end),
            end: self.end.max(offset),
            commits: self.commits.clone(),
            from: self.from + skip,
        }
    }
}
