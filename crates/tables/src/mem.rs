use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use tierforge_core::{
    AppendOutcome, CommitToken, Offset, PartitionSpec, ReadResult, Row, Schema,
    StoreError, StoreResult, TableStore,
};
use tracing::debug;

use crate::state::{Pending, TableMeta, TableState};

/// In-process Table Store.
#[derive(Default)]
pub struct MemTableStore {
    tables: RwLock<HashMap<String, TableState>>,
}

impl MemTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-partition row counts of every commit, in commit order.
    pub fn partition_counts(
        &self,
        name: &str,
    ) -> StoreResult<Vec<std::collections::BTreeMap<String, usize>>> {
        self.with_table(name, |t| {
            t.commits().iter().map(|c| c.partitions.clone()).collect()
        })
    }

    fn with_table<T>(
        &self,
        name: &str,
        f: impl FnOnce(&TableState) -> T,
    ) -> StoreResult<T> {
        let tables = self.tables.read();
        tables.get(name).map(f).ok_or_else(|| not_found(name))
    }
}

pub(crate) fn not_found(name: &str) -> StoreError {
    StoreError::TableNotFound {
        table: name.to_string(),
    }
}

#[async_trait]
impl TableStore for MemTableStore {
    async fn create_table(
        &self,
        name: &str,
        schema: Schema,
        spec: PartitionSpec,
    ) -> StoreResult<()> {
        spec.validate(&schema)?;
        let mut tables = self.tables.write();
        match tables.get(name) {
            Some(existing) => existing.check_definition(name, &schema, &spec),
            None => {
                debug!(table = name, fields = schema.len(), "table created");
                tables.insert(
                    name.to_string(),
                    TableState::new(TableMeta {
                        schema,
                        partition_spec: spec,
                    }),
                );
                Ok(())
            }
        }
    }

    async fn append_rows(
        &self,
        name: &str,
        rows: Vec<Row>,
        token: Option<CommitToken>,
    ) -> StoreResult<AppendOutcome> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(name).ok_or_else(|| not_found(name))?;
        match table.prepare(name, rows, token)? {
            Pending::Skip(outcome) => Ok(outcome),
            Pending::Write(record) => {
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
        self.with_table(name, |t| t.read_since(since, max_commits))
    }

    async fn drop_table(&self, name: &str) -> StoreResult<bool> {
        Ok(self.tables.write().remove(name).is_some())
    }

    async fn schema(&self, name: &str) -> StoreResult<Schema> {
        self.with_table(name, |t| t.meta.schema.clone())
    }

    async fn partition_spec(&self, name: &str) -> StoreResult<PartitionSpec> {
        self.with_table(name, |t| t.meta.partition_spec.clone())
    }

    async fn writer_watermark(
        &self,
        name: &str,
        writer: &str,
    ) -> StoreResult<Option<Offset>> {
        self.with_table(name, |t| t.watermark(writer))
    }

    async fn head(&self, name: &str) -> StoreResult<Offset> {
        self.with_table(name, TableState::head)
    }

    async fn list_tables(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tierforge_core::{CommitId, Field, FieldType, SchemaViolation};

    fn identity_schema() -> Schema {
        Schema::new(vec![
            Field::required(1, "id", FieldType::Integer),
            Field::optional(2, "firstName", FieldType::String),
        ])
        .unwrap()
    }

    fn person(id: i64, name: Option<&str>) -> Row {
        Row::new().with("id", id).with("firstName", name)
    }

    async fn store() -> MemTableStore {
        let store = MemTableStore::new();
        store
            .create_table(
                "silver",
                identity_schema(),
                PartitionSpec::unpartitioned().bucket("id", 10),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_is_idempotent_but_detects_conflicts() {
        let store = store().await;
        store
            .create_table(
                "silver",
                identity_schema(),
                PartitionSpec::unpartitioned().bucket("id", 10),
            )
            .await
            .unwrap();

        let other = Schema::new(vec![Field::required(1, "id", FieldType::Integer)])
            .unwrap();
        let err = store
            .create_table("silver", other, PartitionSpec::unpartitioned())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaConflict { .. }));

        let err = store
            .create_table("silver", identity_schema(), PartitionSpec::unpartitioned())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaConflict { .. }));
    }

    #[tokio::test]
    async fn append_is_all_or_nothing() {
        let store = store().await;
        let rows = vec![
            person(1, Some("abc")),
            Row::new().with("id", Option::<i64>::None).with("firstName", "x"),
        ];

        let err = store.append_rows("silver", rows, None).await.unwrap_err();
        match err {
            StoreError::SchemaViolation {
                index, violation, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(
                    violation,
                    SchemaViolation::NullRequired { field: "id".into() }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(store.head("silver").await.unwrap(), Offset::ZERO);
        assert!(store.scan("silver").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commits_are_numbered_and_read_in_order() {
        let store = store().await;
        for id in 1..=3 {
            let out = store
                .append_rows("silver", vec![person(id, None)], None)
                .await
                .unwrap();
            assert_eq!(out.commit, Some(CommitId(id as u64)));
        }

        let read = store.read_since("silver", Offset(1), None).await.unwrap();
        let ids: Vec<u64> = read.commits.iter().map(|c| c.commit.0).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(read.new_offset, Offset(3));

        let limited = store.read_since("silver", Offset::ZERO, Some(2)).await.unwrap();
        assert_eq!(limited.commits.len(), 2);
        assert_eq!(limited.new_offset, Offset(2));

        let nothing = store.read_since("silver", Offset(3), None).await.unwrap();
        assert!(nothing.commits.is_empty());
        assert_eq!(nothing.new_offset, Offset(3));
    }

    #[tokio::test]
    async fn empty_append_creates_no_commit() {
        let store = store().await;
        let out = store.append_rows("silver", vec![], None).await.unwrap();
        assert_eq!(out.commit, None);
        assert_eq!(store.head("silver").await.unwrap(), Offset::ZERO);
    }

    #[tokio::test]
    async fn token_deduplicates_replayed_appends() {
        let store = store().await;
        let token = CommitToken::new("sink_a", Offset(4));

        let first = store
            .append_rows("silver", vec![person(1, None)], Some(token.clone()))
            .await
            .unwrap();
        assert!(!first.deduplicated);

        let replay = store
            .append_rows("silver", vec![person(1, None)], Some(token))
            .await
            .unwrap();
        assert!(replay.deduplicated);
        assert_eq!(replay.commit, None);
        assert_eq!(store.scan("silver").await.unwrap().len(), 1);

        assert_eq!(
            store.writer_watermark("silver", "sink_a").await.unwrap(),
            Some(Offset(4))
        );
        assert_eq!(store.writer_watermark("silver", "sink_b").await.unwrap(), None);
    }

    #[tokio::test]
    async fn partition_counts_recorded_per_commit() {
        let store = store().await;
        store
            .append_rows("silver", vec![person(1, None), person(1, Some("a"))], None)
            .await
            .unwrap();
        let counts = store.partition_counts("silver").unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].values().sum::<usize>(), 2);
        assert_eq!(counts[0].len(), 1);
    }

    #[tokio::test]
    async fn missing_table_and_drop() {
        let store = store().await;
        assert!(matches!(
            store.head("nope").await,
            Err(StoreError::TableNotFound { .. })
        ));
        assert!(store.drop_table("silver").await.unwrap());
        assert!(!store.drop_table("silver").await.unwrap());
        assert!(store.list_tables().await.unwrap().is_empty());
    }
}
