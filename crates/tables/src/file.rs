//! Directory-backed Table Store.
//!
//! Layout under `root`:
//!
//! ```text
//! <table>/schema.json
//! <table>/commits/00000000000000000001.json
//! <table>/commits/00000000000000000002.json
//! ```
//!
//! Each commit file is written to a temp name, synced and renamed into
//! place, so a commit is either fully present or absent after a crash.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tierforge_core::{
    AppendOutcome, CommitToken, Offset, PartitionSpec, ReadResult, Row, Schema,
    StoreResult, TableStore,
};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::mem::not_found;
use crate::state::{CommitRecord, Pending, TableMeta, TableState};

const SCHEMA_FILE: &str = "schema.json";
const COMMITS_DIR: &str = "commits";

pub struct FileTableStore {
    root: PathBuf,
    tables: Mutex<HashMap<String, TableState>>,
}

impl FileTableStore {
    /// Open `root`, creating it if needed, and load every table found there.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let mut tables = HashMap::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let dir = entry.path();
            if !dir.join(SCHEMA_FILE).exists() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let state = load_table(&dir)
                .with_context(|| format!("loading table {name}"))?;
            debug!(table = %name, head = %state.head(), "table loaded");
            tables.insert(name, state);
        }
        info!(root = %root.display(), tables = tables.len(), "file table store opened");

        Ok(Self {
            root,
            tables: Mutex::new(tables),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn commit_path(&self, name: &str, id: u64) -> PathBuf {
        self.table_dir(name)
            .join(COMMITS_DIR)
            .join(format!("{id:020}.json"))
    }

    async fn with_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&TableState) -> T,
    ) -> StoreResult<T> {
        let tables = self.tables.lock().await;
        tables.get(name).map(f).ok_or_else(|| not_found(name))
    }

    /// Like `with_table`, after adopting commits already on disk.
    async fn with_current_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&TableState) -> T,
    ) -> StoreResult<T> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(name).ok_or_else(|| not_found(name))?;
        self.catch_up(name, table).await?;
        Ok(f(table))
    }

    /// Apply commit files past the in-memory head. They appear when an
    /// append is dropped between its rename and its in-memory apply, or when
    /// another handle on the same root wrote them.
    async fn catch_up(&self, name: &str, table: &mut TableState) -> StoreResult<()> {
        loop {
            let next = self.commit_path(name, table.head().0 + 1);
            if !tokio::fs::try_exists(&next).await? {
                return Ok(());
            }
            let record: CommitRecord =
                serde_json::from_slice(&tokio::fs::read(&next).await?)?;
            debug!(table = name, commit = %record.id, "adopting commit found on disk");
            table.apply(record);
        }
    }
}

fn load_table(dir: &Path) -> anyhow::Result<TableState> {
    let meta: TableMeta =
        serde_json::from_slice(&std::fs::read(dir.join(SCHEMA_FILE))?)?;

    let mut commits = Vec::new();
    let commits_dir = dir.join(COMMITS_DIR);
    if commits_dir.exists() {
        for entry in std::fs::read_dir(&commits_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let record: CommitRecord = serde_json::from_slice(&std::fs::read(&path)?)
                .with_context(|| format!("reading {}", path.display()))?;
            commits.push(record);
        }
    }
    commits.sort_by_key(|c| c.id);
    for (i, c) in commits.iter().enumerate() {
        anyhow::ensure!(
            c.id.0 == i as u64 + 1,
            "commit history has a gap before {}",
            c.id
        );
    }

    Ok(TableState::restore(meta, commits))
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl TableStore for FileTableStore {
    async fn create_table(
        &self,
        name: &str,
        schema: Schema,
        spec: PartitionSpec,
    ) -> StoreResult<()> {
        spec.validate(&schema)?;
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.get(name) {
            return existing.check_definition(name, &schema, &spec);
        }

        let meta = TableMeta {
            schema,
            partition_spec: spec,
        };
        let dir = self.table_dir(name);
        tokio::fs::create_dir_all(dir.join(COMMITS_DIR)).await?;
        write_atomic(&dir.join(SCHEMA_FILE), &serde_json::to_vec_pretty(&meta)?)
            .await?;
        debug!(table = name, dir = %dir.display(), "table created");

        tables.insert(name.to_string(), TableState::new(meta));
        Ok(())
    }

    async fn append_rows(
        &self,
        name: &str,
        rows: Vec<Row>,
        token: Option<CommitToken>,
    ) -> StoreResult<AppendOutcome> {
        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(name).ok_or_else(|| not_found(name))?;

        self.catch_up(name, table).await?;

        match table.prepare(name, rows, token)? {
            Pending::Skip(outcome) => Ok(outcome),
            Pending::Write(record) => {
                let path = self.commit_path(name, record.id.0);
                write_atomic(&path, &serde_json::to_vec(&record)?).await?;

                let outcome = AppendOutcome {
                    commit: Some(record.id),
                    rows: record.rows.len(),
                    deduplicated: false,
                };
                table.apply(record);
                Ok(outcome)
            }
        }
    }

    async fn read_since(
        &self,
        name: &str,
        since: Offset,
        max_commits: Option<usize>,
    ) -> StoreResult<ReadResult> {
        self.with_current_table(name, |t| t.read_since(since, max_commits))
            .await
    }

    async fn drop_table(&self, name: &str) -> StoreResult<bool> {
        let mut tables = self.tables.lock().await;
        if tables.remove(name).is_none() {
            return Ok(false);
        }
        tokio::fs::remove_dir_all(self.table_dir(name)).await?;
        Ok(true)
    }

    async fn schema(&self, name: &str) -> StoreResult<Schema> {
        self.with_table(name, |t| t.meta.schema.clone()).await
    }

    async fn partition_spec(&self, name: &str) -> StoreResult<PartitionSpec> {
        self.with_table(name, |t| t.meta.partition_spec.clone()).await
    }

    async fn writer_watermark(
        &self,
        name: &str,
        writer: &str,
    ) -> StoreResult<Option<Offset>> {
        self.with_current_table(name, |t| t.watermark(writer)).await
    }

    async fn head(&self, name: &str) -> StoreResult<Offset> {
        self.with_current_table(name, TableState::head).await
    }

    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> =
            self.tables.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tierforge_core::{Field, FieldType};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::required(1, "id", FieldType::Integer),
            Field::optional(2, "cityName", FieldType::String),
        ])
        .unwrap()
    }

    fn row(id: i64, city: &str) -> Row {
        Row::new().with("id", id).with("cityName", city)
    }

    #[tokio::test]
    async fn reopen_restores_rows_and_watermarks() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileTableStore::open(dir.path()).unwrap();
            store
                .create_table("t", schema(), PartitionSpec::unpartitioned().bucket("id", 10))
                .await
                .unwrap();
            store
                .append_rows(
                    "t",
                    vec![row(1, "redmond"), row(2, "seattle")],
                    Some(CommitToken::new("w", Offset(1))),
                )
                .await
                .unwrap();
            store.append_rows("t", vec![row(3, "bellevue")], None).await.unwrap();
        }

        let store = FileTableStore::open(dir.path()).unwrap();
        assert_eq!(store.head("t").await.unwrap(), Offset(2));
        assert_eq!(store.scan("t").await.unwrap().len(), 3);
        assert_eq!(
            store.writer_watermark("t", "w").await.unwrap(),
            Some(Offset(1))
        );

        let out = store
            .append_rows("t", vec![row(1, "redmond")], Some(CommitToken::new("w", Offset(1))))
            .await
            .unwrap();
        assert!(out.deduplicated);
        assert_eq!(store.schema("t").await.unwrap(), schema());
    }

    #[tokio::test]
    async fn create_after_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        FileTableStore::open(dir.path())
            .unwrap()
            .create_table("t", schema(), PartitionSpec::unpartitioned())
            .await
            .unwrap();

        let store = FileTableStore::open(dir.path()).unwrap();
        store
            .create_table("t", schema(), PartitionSpec::unpartitioned())
            .await
            .unwrap();
        assert_eq!(store.list_tables().await.unwrap(), vec!["t"]);
    }

    #[tokio::test]
    async fn commits_written_by_another_handle_are_adopted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FileTableStore::open(dir.path()).unwrap();
        writer
            .create_table("t", schema(), PartitionSpec::unpartitioned())
            .await
            .unwrap();
        let reader = FileTableStore::open(dir.path()).unwrap();

        writer
            .append_rows("t", vec![row(1, "redmond")], Some(CommitToken::new("w", Offset(1))))
            .await
            .unwrap();

        assert_eq!(
            reader.writer_watermark("t", "w").await.unwrap(),
            Some(Offset(1))
        );
        assert_eq!(reader.head("t").await.unwrap(), Offset(1));
        let read = reader.read_since("t", Offset::ZERO, None).await.unwrap();
        assert_eq!(read.new_offset, Offset(1));
        assert_eq!(read.commits.len(), 1);
    }

    #[tokio::test]
    async fn drop_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTableStore::open(dir.path()).unwrap();
        store
            .create_table("t", schema(), PartitionSpec::unpartitioned())
            .await
            .unwrap();
        assert!(dir.path().join("t").exists());

        assert!(store.drop_table("t").await.unwrap());
        assert!(!dir.path().join("t").exists());
    }

    #[tokio::test]
    async fn rejected_append_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTableStore::open(dir.path()).unwrap();
        store
            .create_table("t", schema(), PartitionSpec::unpartitioned())
            .await
            .unwrap();

        let bad = Row::new().with("id", "not-an-int").with("cityName", "x");
        assert!(store.append_rows("t", vec![bad], None).await.is_err());

        let files = std::fs::read_dir(dir.path().join("t/commits")).unwrap().count();
        assert_eq!(files, 0);
    }
}
