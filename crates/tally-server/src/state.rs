//! State shared by the HTTP surface, the RPC handler and the flush loop.

use std::sync::Arc;
use tally_core::{Store, TrustedSubnet};
use tally_storage::{Persister, StorageError};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Everything a request handler needs
pub struct ServerState {
    pub store: Arc<Store>,
    /// HMAC key; empty disables integrity checks
    pub key: String,
    pub persister: Option<Arc<dyn Persister>>,
    /// Save after every successful write instead of on a timer
    pub sync_flush: bool,
    pub trusted: Option<TrustedSubnet>,
    /// Held from snapshot to save so flushes land in the order they were taken
    pub flush_lock: Mutex<()>,
}

impl ServerState {
    /// State with no persistence, no key and no subnet
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            key: String::new(),
            persister: None,
            sync_flush: false,
            trusted: None,
            flush_lock: Mutex::new(()),
        }
    }

    /// Copy the store and hand it to the persister. No-op without one.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let Some(persister) = &self.persister else {
            return Ok(());
        };
        let _serial = self.flush_lock.lock().await;
        let snapshot = self.store.snapshot();
        persister.save(&snapshot).await?;
        debug!(records = snapshot.len(), "Flushed store");
        Ok(())
    }

    /// Hook run after every successful write
    pub async fn after_write(&self) {
        if !self.sync_flush {
            return;
        }
        if let Err(e) = self.flush().await {
            error!(error = %e, "Synchronous flush failed");
        }
    }

    /// Load the persisted snapshot into the store.
    ///
    /// A load failure is logged and the server starts empty.
    pub async fn restore(&self) -> usize {
        let Some(persister) = &self.persister else {
            return 0;
        };
        match persister.load().await {
            Ok(snapshot) => {
                let restored = self.store.restore(&snapshot);
                info!(restored, backend = %persister.describe(), "Restored metrics");
                restored
            }
            Err(e) => {
                warn!(error = %e, backend = %persister.describe(), "Failed to restore metrics");
                0
            }
        }
    }

    /// Whether persistence is reachable; no persister counts as unhealthy
    pub async fn healthy(&self) -> bool {
        match &self.persister {
            Some(persister) => persister.ping().await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::MetricRecord;
    use tally_storage::FileStore;
    use tempfile::tempdir;

    fn with_file(dir: &tempfile::TempDir, sync_flush: bool) -> ServerState {
        ServerState {
            persister: Some(Arc::new(FileStore::new(dir.path().join("m.json")))),
            sync_flush,
            ..ServerState::new(Arc::new(Store::new()))
        }
    }

    #[tokio::test]
    async fn test_sync_flush_after_write() {
        let dir = tempdir().unwrap();
        let state = with_file(&dir, true);

        state.store.add_counter("hits", 2).unwrap();
        state.after_write().await;

        let saved = FileStore::new(dir.path().join("m.json")).load().await.unwrap();
        assert_eq!(saved, vec![MetricRecord::counter("hits", 2)]);
    }

    #[tokio::test]
    async fn test_no_flush_when_interval_set() {
        let dir = tempdir().unwrap();
        let state = with_file(&dir, false);

        state.store.add_counter("hits", 2).unwrap();
        state.after_write().await;
        assert!(!dir.path().join("m.json").exists());

        state.flush().await.unwrap();
        assert!(dir.path().join("m.json").exists());
    }

    #[tokio::test]
    async fn test_restore_and_health() {
        let dir = tempdir().unwrap();
        let first = with_file(&dir, true);
        first.store.set_gauge("temp", 20.5).unwrap();
        first.flush().await.unwrap();

        let second = with_file(&dir, false);
        assert_eq!(second.restore().await, 1);
        assert_eq!(second.store.read_gauge("temp").unwrap(), 20.5);
        assert!(second.healthy().await);

        let bare = ServerState::new(Arc::new(Store::new()));
        assert!(!bare.healthy().await);
        assert_eq!(bare.restore().await, 0);
        assert!(bare.flush().await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_flushes_keep_latest_snapshot() {
        let dir = tempdir().unwrap();
        let state = Arc::new(with_file(&dir, true));

        let mut writers = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            writers.push(tokio::spawn(async move {
                for _ in 0..25 {
                    state.store.add_counter("hits", 1).unwrap();
                    state.after_write().await;
                }
            }));
        }
        for writer in writers {
            writer.await.unwrap();
        }

        let saved = FileStore::new(dir.path().join("m.json")).load().await.unwrap();
        assert_eq!(saved, vec![MetricRecord::counter("hits", 200)]);
    }
}
