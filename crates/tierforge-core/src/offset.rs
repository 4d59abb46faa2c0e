use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of one committed append to a table. Ids start at 1 and grow by
/// one per commit, so they double as the table's commit order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CommitId(pub u64);

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Consumption marker into a source table's commit history: every commit
/// with an id up to and including this value has been consumed.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct Offset(pub u64);

impl Offset {
    /// Nothing consumed yet.
    pub const ZERO: Offset = Offset(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `true` if `commit` lies strictly after this offset.
    pub fn precedes(&self, commit: CommitId) -> bool {
        commit.0 > self.0
    }
}

impl From<CommitId> for Offset {
    fn from(c: CommitId) -> Self {
        Offset(c.0)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Idempotency token attached to a sink's append.
///
/// `source_end` is the inclusive end of the source range the append covers.
/// A store that has already accepted a token from `writer` with the same or
/// a later `source_end` acknowledges the append without writing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitToken {
    pub writer: String,
    pub source_end: Offset,
}

impl CommitToken {
    pub fn new(writer: impl Into<String>, source_end: Offset) -> Self {
        Self {
            writer: writer.into(),
            source_end,
        }
    }
}
