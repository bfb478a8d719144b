//! Store -> persister -> fresh store round trips.

use std::sync::Arc;
use tally_core::Store;
use tally_storage::{DbStore, FileStore, Persister};
use tempfile::tempdir;

async fn round_trip(persister: Arc<dyn Persister>) {
    let store = Store::new();
    store.update_raw("counter", "requests", "5").unwrap();
    store.update_raw("counter", "requests", "3").unwrap();
    store.update_raw("gauge", "temp", "36.6").unwrap();
    store.update_raw("gauge", "temp", "37.1").unwrap();

    persister.save(&store.snapshot()).await.unwrap();

    let restored = Store::new();
    let snapshot = persister.load().await.unwrap();
    assert_eq!(restored.restore(&snapshot), 2);
    assert_eq!(restored.read_counter("requests").unwrap(), 8);
    assert_eq!(restored.read_gauge("temp").unwrap(), 37.1);
    assert_eq!(restored.snapshot(), store.snapshot());
}

#[tokio::test]
async fn test_file_restore_round_trip() {
    let dir = tempdir().unwrap();
    round_trip(Arc::new(FileStore::new(dir.path().join("metrics.json")))).await;
}

#[tokio::test]
async fn test_sqlite_restore_round_trip() {
    let dir = tempdir().unwrap();
    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("metrics.db").display());
    let db = DbStore::connect(&dsn).await.unwrap();
    round_trip(Arc::new(db)).await;
}

#[tokio::test]
async fn test_restore_on_top_of_live_values() {
    let dir = tempdir().unwrap();
    let file = FileStore::new(dir.path().join("metrics.json"));

    let earlier = Store::new();
    earlier.add_counter("PollCount", 10).unwrap();
    file.save(&earlier.snapshot()).await.unwrap();

    let live = Store::new();
    live.add_counter("PollCount", 99).unwrap();
    live.set_gauge("only_live", 1.0).unwrap();
    live.restore(&file.load().await.unwrap());

    assert_eq!(live.read_counter("PollCount").unwrap(), 10);
    assert_eq!(live.read_gauge("only_live").unwrap(), 1.0);
}
