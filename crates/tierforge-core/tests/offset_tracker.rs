use std::sync::Arc;

use checkpoints::{CheckpointStore, FileCheckpointStore, SqliteCheckpointStore};
use pretty_assertions::assert_eq;
use tierforge_core::{EngineError, Offset, OffsetRecord, OffsetTracker, offset_key};

fn file_tracker(dir: &std::path::Path) -> OffsetTracker {
    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(dir.join("offsets.json")).unwrap());
    OffsetTracker::new(store)
}

#[tokio::test]
async fn file_offsets_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let tracker = file_tracker(dir.path());
    tracker.commit("bronze", "silver_identity", Offset(2)).await.unwrap();
    drop(tracker);

    let reopened = file_tracker(dir.path());
    assert_eq!(
        reopened.get("bronze", "silver_identity").await.unwrap(),
        Offset(2)
    );
}

#[tokio::test]
async fn record_json_layout() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = file_tracker(dir.path());
    tracker.commit("bronze", "silver_address", Offset(9)).await.unwrap();

    let raw = tracker
        .store()
        .get_raw(&offset_key("bronze", "silver_address"))
        .await
        .unwrap()
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(json["source"], "bronze");
    assert_eq!(json["sink"], "silver_address");
    assert_eq!(json["offset"], 9);
    assert!(json["committed_at"].is_string());
}

#[tokio::test]
async fn sqlite_history_is_strictly_increasing() {
    let store: Arc<dyn CheckpointStore> =
        Arc::new(SqliteCheckpointStore::in_memory().unwrap());
    let tracker = OffsetTracker::new(store.clone());

    for o in [1, 2, 2, 4] {
        tracker.commit("bronze", "s", Offset(o)).await.unwrap();
    }
    assert!(matches!(
        tracker.commit("bronze", "s", Offset(3)).await,
        Err(EngineError::Persistence { .. })
    ));

    use checkpoints::CheckpointStoreExt;
    let history: Vec<OffsetRecord> =
        store.history(&offset_key("bronze", "s")).await.unwrap();
    let offsets: Vec<u64> = history.iter().map(|r| r.offset.0).collect();
    assert_eq!(offsets, vec![1, 2, 4]);
}
