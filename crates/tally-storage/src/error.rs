//! Storage error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while saving or loading snapshots.
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error on the snapshot file
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database driver error
    #[error("Database error: {0}")]
    Database(String),

    /// Operation did not finish in time
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(e: sqlx::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}
