//! Embedded-entity fan-out.
//!
//! A wide row carrying `n` copies of the same sub-entity in numbered column
//! groups ("slots") becomes up to `n` narrow rows:
//!
//! ```text
//! key_column | parent.to | slot columns...
//! parent*n+i | parent    | slot i values
//! ```
//!
//! A slot is emitted only when at least one of its columns is non-null. The
//! synthesized key depends only on the parent value and the slot index, so
//! re-projecting a row always yields the same keys.

use std::sync::Arc;

use tierforge_config::ColumnMap;
use tierforge_core::{
    FieldType, Projected, ProjectionRule, Row, Schema, SchemaError, Value,
};
use tracing::warn;

pub struct SplitRule {
    target: Arc<str>,
    key_column: String,
    parent: ColumnMap,
    slots: Vec<Vec<ColumnMap>>,
}

impl SplitRule {
    pub fn new(
        target: impl Into<Arc<str>>,
        key_column: impl Into<String>,
        parent: ColumnMap,
        slots: Vec<Vec<ColumnMap>>,
    ) -> Self {
        Self {
            target: target.into(),
            key_column: key_column.into(),
            parent,
            slots,
        }
    }

    /// `parent * slot_count + slot`, or `None` on overflow.
    pub fn synthesize_key(&self, parent: i64, slot: usize) -> Option<i64> {
        let n = i64::try_from(self.slots.len()).ok()?;
        let i = i64::try_from(slot).ok()?;
        parent.checked_mul(n)?.checked_add(i)
    }
}

impl ProjectionRule for SplitRule {
    fn kind(&self) -> &'static str {
        "split"
    }

    fn target(&self) -> &str {
        &self.target
    }

    fn check_source(&self, source: &Schema) -> Result<(), SchemaError> {
        let parent = source.require(self.parent.source())?;
        if parent.ty != FieldType::Integer {
            return Err(SchemaError::IntegerKey {
                column: parent.name.clone(),
            });
        }
        for slot in &self.slots {
            for c in slot {
                source.require(c.source())?;
            }
        }
        Ok(())
    }

    fn project(&self, row: &Row) -> Vec<Projected> {
        let Some(parent) = row.value(self.parent.source()).as_int() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.iter().all(|c| row.value(c.source()).is_null()) {
                continue;
            }
            let Some(key) = self.synthesize_key(parent, i) else {
                warn!(parent, slot = i, target = %self.target, "synthesized key overflows, slot skipped");
                continue;
            };

            let mut r = Row::with_capacity(slot.len() + 2);
            r.push(self.key_column.as_str(), Value::Int(key));
            r.push(self.parent.target(), Value::Int(parent));
            for c in slot {
                r.push(c.target(), row.value(c.source()).clone());
            }
            out.push(Projected {
                table: self.target.clone(),
                row: r,
            });
        }
        out
    }
}
