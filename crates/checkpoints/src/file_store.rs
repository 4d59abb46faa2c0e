use super::{CheckpointResult, CheckpointStore};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Single JSON document holding every key. Writes go to a temp file that is
/// synced and renamed over the original, so a crash leaves either the old or
/// the new map on disk.
pub struct FileCheckpointStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileCheckpointStore {
    pub fn new<P: AsRef<Path>>(path: P) -> CheckpointResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> CheckpointResult<BTreeMap<String, Vec<u8>>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(BTreeMap::new());
        }
        let bytes = tokio::fs::read(&self.path).await?;
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save(&self, map: &BTreeMap<String, Vec<u8>>) -> CheckpointResult<()> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), keys = map.len(), "offset file saved");
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn get_raw(&self, key: &str) -> CheckpointResult<Option<Vec<u8>>> {
        let _g = self.guard.lock().await;
        let mut map = self.load().await?;
        Ok(map.remove(key))
    }

    async fn put_raw(&self, key: &str, bytes: &[u8]) -> CheckpointResult<()> {
        let _g = self.guard.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), bytes.to_vec());
        self.save(&map).await
    }

    async fn delete(&self, key: &str) -> CheckpointResult<bool> {
        let _g = self.guard.lock().await;
        let mut map = self.load().await?;
        let existed = map.remove(key).is_some();
        if existed {
            self.save(&map).await?;
        }
        Ok(existed)
    }

    async fn list(&self) -> CheckpointResult<Vec<String>> {
        let _g = self.guard.lock().await;
        let map = self.load().await?;
        Ok(map.keys().cloned().collect())
    }
}
