//! RPC Error types

use crate::ErrorCode;
use thiserror::Error;

/// Errors that can occur during RPC operations
#[derive(Debug, Error)]
pub enum RpcError {
    /// IO error during socket operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame size exceeded maximum
    #[error("Frame too large: {0} bytes (max 1MB)")]
    FrameTooLarge(usize),

    /// Failed to deserialize message
    #[error("Deserialization failed: {0}")]
    Deserialize(String),

    /// Failed to serialize message
    #[error("Serialization failed: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Server answered with an error response
    #[error("Server error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// Server answered with a response that does not fit the request
    #[error("Unexpected response")]
    UnexpectedResponse,
}

impl From<rmp_serde::decode::Error> for RpcError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        RpcError::Deserialize(e.to_string())
    }
}
