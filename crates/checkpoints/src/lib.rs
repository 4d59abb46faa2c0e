//! Durable key/value storage for sink offset records.
//!
//! Each sink persists its committed source offset under its own key
//! (`<sink>/<source>`), so stores never coordinate between sinks. Some
//! backends also keep every write, which lets operators audit that offsets
//! only ever moved forward.

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

mod errors;
mod file_store;
mod mem_store;

#[cfg(feature = "cp-sqlite")]
mod sqlite_store;

pub use errors::{CheckpointError, CheckpointResult};
pub use file_store::FileCheckpointStore;
pub use mem_store::MemCheckpointStore;

#[cfg(feature = "cp-sqlite")]
pub use sqlite_store::SqliteCheckpointStore;

/// Offset storage.
///
/// `put_raw` must be durable when it returns `Ok`: from then on the engine
/// never re-delivers the covered rows to that sink.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest value stored under `key`.
    async fn get_raw(&self, key: &str) -> CheckpointResult<Option<Vec<u8>>>;

    async fn put_raw(&self, key: &str, bytes: &[u8]) -> CheckpointResult<()>;

    /// Remove `key` and any history it has. `false` if it did not exist.
    async fn delete(&self, key: &str) -> CheckpointResult<bool>;

    /// Stored keys in ascending order.
    async fn list(&self) -> CheckpointResult<Vec<String>>;

    fn keeps_history(&self) -> bool {
        false
    }

    /// Every value ever written under `key`, oldest first.
    async fn history_raw(&self, key: &str) -> CheckpointResult<Vec<Vec<u8>>> {
        Err(CheckpointError::NotSupported(format!(
            "no write history for {key}"
        )))
    }
}

/// JSON-typed access on top of the byte API.
#[async_trait]
pub trait CheckpointStoreExt: CheckpointStore {
    async fn get<T>(&self, key: &str) -> CheckpointResult<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.get_raw(key)
            .await?
            .map(|buf| serde_json::from_slice(&buf))
            .transpose()
            .map_err(Into::into)
    }

    async fn put<T>(&self, key: &str, record: T) -> CheckpointResult<()>
    where
        T: Serialize + Send + 'static,
    {
        let buf = serde_json::to_vec(&record)?;
        self.put_raw(key, &buf).await
    }

    async fn history<T>(&self, key: &str) -> CheckpointResult<Vec<T>>
    where
        T: DeserializeOwned + Send,
    {
        self.history_raw(key)
            .await?
            .iter()
            .map(|buf| serde_json::from_slice(buf).map_err(Into::into))
            .collect()
    }
}

impl<T: CheckpointStore + ?Sized> CheckpointStoreExt for T {}
