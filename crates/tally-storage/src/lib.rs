//! Tally Storage
//!
//! Persistence adapters that mirror the in-memory store: a flat JSON file
//! and a SQL table. Both sit behind the [`Persister`] trait so the server
//! picks one at startup and never cares which.

mod db;
mod error;
mod file;

pub use db::{DbStore, DB_TIMEOUT};
pub use error::StorageError;
pub use file::FileStore;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tally_core::Snapshot;
use tracing::info;

/// Durable mirror of the metric store
#[async_trait]
pub trait Persister: Send + Sync {
    /// Replace the persisted state with `snapshot`
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError>;

    /// Read back the last saved snapshot
    async fn load(&self) -> Result<Snapshot, StorageError>;

    /// Whether the backend is reachable
    async fn ping(&self) -> bool;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Which backend to open
#[derive(Debug, Clone, Default)]
pub struct PersistOptions {
    /// Database DSN, takes precedence over the file
    pub dsn: Option<String>,
    /// Snapshot file path
    pub file: Option<PathBuf>,
}

/// Open the configured backend: database when a DSN is set, else the file,
/// else nothing.
pub async fn open_persister(
    options: &PersistOptions,
) -> Result<Option<Arc<dyn Persister>>, StorageError> {
    let persister: Arc<dyn Persister> = match (&options.dsn, &options.file) {
        (Some(dsn), _) if !dsn.is_empty() => Arc::new(DbStore::connect(dsn).await?),
        (_, Some(path)) if !path.as_os_str().is_empty() => Arc::new(FileStore::new(path)),
        _ => {
            info!("Persistence disabled");
            return Ok(None);
        }
    };

    info!(backend = %persister.describe(), "Persistence enabled");
    Ok(Some(persister))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_open_none() {
        assert!(open_persister(&PersistOptions::default())
            .await
            .unwrap()
            .is_none());

        let empty = PersistOptions {
            dsn: Some(String::new()),
            file: Some(PathBuf::new()),
        };
        assert!(open_persister(&empty).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let options = PersistOptions {
            dsn: None,
            file: Some(path.clone()),
        };
        let persister = open_persister(&options).await.unwrap().unwrap();
        assert_eq!(persister.describe(), format!("file {}", path.display()));
    }

    #[tokio::test]
    async fn test_dsn_wins_over_file() {
        let dir = tempdir().unwrap();
        let options = PersistOptions {
            dsn: Some(format!(
                "sqlite://{}?mode=rwc",
                dir.path().join("metrics.db").display()
            )),
            file: Some(dir.path().join("metrics.json")),
        };
        let persister = open_persister(&options).await.unwrap().unwrap();
        assert_eq!(persister.describe(), "sqlite database");
    }
}
