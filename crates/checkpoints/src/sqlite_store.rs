//! SQLite offset store.
//!
//! Writes append rows instead of updating in place, so the table doubles as
//! the offset audit log. Queries run on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::{CheckpointError, CheckpointResult, CheckpointStore};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    PRAGMA synchronous=FULL;
    PRAGMA busy_timeout=5000;

    CREATE TABLE IF NOT EXISTS offset_log (
        seq         INTEGER PRIMARY KEY AUTOINCREMENT,
        key         TEXT    NOT NULL,
        record      BLOB    NOT NULL,
        written_at  TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS offset_log_key ON offset_log(key, seq);
"#;

fn db_err(e: rusqlite::Error) -> CheckpointError {
    CheckpointError::Database(e.to_string())
}

pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// Open or create the database at `path`, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> CheckpointResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path).map_err(db_err)?)
    }

    pub fn in_memory() -> CheckpointResult<Self> {
        Self::init(Connection::open_in_memory().map_err(db_err)?)
    }

    fn init(conn: Connection) -> CheckpointResult<Self> {
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> CheckpointResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()).map_err(db_err))
            .await
            .map_err(|e| CheckpointError::Database(format!("sqlite task failed: {e}")))?
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn get_raw(&self, key: &str) -> CheckpointResult<Option<Vec<u8>>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT record FROM offset_log WHERE key = ?1 \
                 ORDER BY seq DESC LIMIT 1",
                params![key],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn put_raw(&self, key: &str, bytes: &[u8]) -> CheckpointResult<()> {
        let key = key.to_owned();
        let record = bytes.to_vec();
        let written_at = Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO offset_log (key, record, written_at) \
                 VALUES (?1, ?2, ?3)",
                params![key, record, written_at],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, key: &str) -> CheckpointResult<bool> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM offset_log WHERE key = ?1", params![key])
                .map(|n| n > 0)
        })
        .await
    }

    async fn list(&self) -> CheckpointResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT DISTINCT key FROM offset_log ORDER BY key")?;
            let keys = stmt.query_map([], |row| row.get(0))?;
            keys.collect()
        })
        .await
    }

    fn keeps_history(&self) -> bool {
        true
    }

    async fn history_raw(&self, key: &str) -> CheckpointResult<Vec<Vec<u8>>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT record FROM offset_log WHERE key = ?1 ORDER BY seq",
            )?;
            let records = stmt.query_map(params![key], |row| row.get(0))?;
            records.collect()
        })
        .await
    }
}
