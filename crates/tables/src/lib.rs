//! Table Store adapters and start-up provisioning.

use std::sync::Arc;

use tierforge_config::{StoreCfg, TableCfg};
use tierforge_core::{ArcDynTableStore, StoreError, StoreResult};
use tracing::info;

mod file;
mod mem;
mod state;

pub use file::FileTableStore;
pub use mem::MemTableStore;
pub use state::{CommitRecord, TableMeta};

pub fn build_table_store(cfg: &StoreCfg) -> StoreResult<ArcDynTableStore> {
    match cfg {
        StoreCfg::Memory => Ok(Arc::new(MemTableStore::new())),
        StoreCfg::File { root } => Ok(Arc::new(FileTableStore::open(root)?)),
    }
}

/// Create every declared table. Tables that already exist with the same
/// definition are left untouched.
pub async fn provision_tables(
    store: &ArcDynTableStore,
    tables: &[TableCfg],
) -> StoreResult<()> {
    for t in tables {
        let (schema, spec) = t.definition().map_err(StoreError::from)?;
        store.create_table(&t.name, schema, spec).await?;
        info!(table = %t.name, "table provisioned");
    }
    Ok(())
}
