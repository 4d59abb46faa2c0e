use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{CheckpointResult, CheckpointStore};

/// In-process store. Offsets are lost with the process, but every write is
/// kept for auditing.
#[derive(Default)]
pub struct MemCheckpointStore {
    writes: RwLock<BTreeMap<String, Vec<Vec<u8>>>>,
}

impl MemCheckpointStore {
    pub fn new() -> CheckpointResult<Self> {
        Ok(Self::default())
    }
}

#[async_trait]
impl CheckpointStore for MemCheckpointStore {
    async fn get_raw(&self, key: &str) -> CheckpointResult<Option<Vec<u8>>> {
        Ok(self
            .writes
            .read()
            .await
            .get(key)
            .and_then(|w| w.last().cloned()))
    }

    async fn put_raw(&self, key: &str, bytes: &[u8]) -> CheckpointResult<()> {
        self.writes
            .write()
            .await
            .entry(key.to_string())
            .or_default()
            .push(bytes.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> CheckpointResult<bool> {
        Ok(self.writes.write().await.remove(key).is_some())
    }

    async fn list(&self) -> CheckpointResult<Vec<String>> {
        Ok(self.writes.read().await.keys().cloned().collect())
    }

    fn keeps_history(&self) -> bool {
        true
    }

    async fn history_raw(&self, key: &str) -> CheckpointResult<Vec<Vec<u8>>> {
        Ok(self
            .writes
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}
