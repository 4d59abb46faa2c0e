//! Sink writers for tierforge.
//!
//! Every configured sink is a [`TableSink`]: it projects source batches
//! through its rule and commits the result to a target table in the shared
//! Table Store. Sinks are isolated from one another; each one validates,
//! retries and fails on its own.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use common::RetryPolicy;
use tierforge_config::EngineSpec;
use tierforge_core::{ArcDynSink, ArcDynTableStore, Schema};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod table;

pub use table::TableSink;

/// Build one sink per configured entry, checking each rule against the
/// source schema.
pub fn build_sinks(
    spec: &EngineSpec,
    store: ArcDynTableStore,
    source: &Schema,
    cancel: CancellationToken,
) -> Result<Vec<ArcDynSink>> {
    let retry = &spec.spec.retry;
    let policy = RetryPolicy::from_millis(
        retry.initial_backoff_ms,
        retry.max_backoff_ms,
        retry.max_retries,
    );
    let commit_timeout = Duration::from_millis(spec.spec.timeouts.commit_ms);

    let rules = projections::build_rules(spec, source)
        .context("building sink projections")?;

    Ok(rules
        .into_iter()
        .map(|(id, rule)| {
            info!(sink = %id, target = %rule.target(), kind = rule.kind(), "building sink");
            let sink = TableSink::new(id, store.clone(), rule)
                .with_retry(policy.clone())
                .with_commit_timeout(commit_timeout)
                .with_cancel(cancel.clone());
            Arc::new(sink) as ArcDynSink
        })
        .collect())
}
