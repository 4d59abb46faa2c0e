//! Projection rules: pure row-to-rows mappings, one per sink.

use std::sync::Arc;

use anyhow::{Context, Result};
use tierforge_config::{EngineSpec, ProjectionCfg, SinkCfg};
use tierforge_core::{ArcDynRule, Schema};

mod select;
mod split;

pub use select::SelectRule;
pub use split::SplitRule;

pub fn build_rule(sink: &SinkCfg) -> ArcDynRule {
    match &sink.projection {
        ProjectionCfg::Select { columns } => {
            Arc::new(SelectRule::new(sink.target.as_str(), columns.clone()))
                as ArcDynRule
        }
        ProjectionCfg::Split {
            key_column,
            parent,
            slots,
        } => Arc::new(SplitRule::new(
            sink.target.as_str(),
            key_column.clone(),
            parent.clone(),
            slots.iter().map(|s| s.columns.clone()).collect(),
        )) as ArcDynRule,
    }
}

/// Build every sink's rule and check it against the source schema.
pub fn build_rules(
    spec: &EngineSpec,
    source: &Schema,
) -> Result<Vec<(String, ArcDynRule)>> {
    spec.spec
        .sinks
        .iter()
        .map(|s| {
            let rule = build_rule(s);
            rule.check_source(source).with_context(|| {
                format!("sink {} reads a column missing from {}", s.id, spec.spec.source.table)
            })?;
            Ok((s.id.clone(), rule))
        })
        .collect()
}
