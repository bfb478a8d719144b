//! Snapshot persistence to a flat JSON file.

use crate::{Persister, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tally_core::Snapshot;
use tracing::debug;

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Keeps the whole store as one JSON array on disk
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> StorageError {
        StorageError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Fresh sibling path per save; concurrent saves never share one
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.path
            .with_file_name(format!(".{}.{}.{}.tmp", name, std::process::id(), seq))
    }
}

#[async_trait]
impl Persister for FileStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_err(e))?;
        }

        let json = serde_json::to_vec(snapshot)?;

        // Atomic write: write to temp file, then rename
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, &json)
            .await
            .map_err(|e| self.io_err(e))?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(self.io_err(e));
        }

        debug!(path = ?self.path, records = snapshot.len(), size = json.len(), "Saved snapshot");
        Ok(())
    }

    async fn load(&self) -> Result<Snapshot, StorageError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No snapshot file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(self.io_err(e)),
        };

        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let snapshot: Snapshot = serde_json::from_str(&content)?;
        debug!(path = ?self.path, records = snapshot.len(), "Loaded snapshot");
        Ok(snapshot)
    }

    async fn ping(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
