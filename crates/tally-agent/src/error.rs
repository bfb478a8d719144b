//! Error types for the agent.

use tally_core::{CipherError, MetricError};
use tally_rpc::RpcError;
use thiserror::Error;

/// Failure to deliver a report
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected the batch with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Encryption failed: {0}")]
    Cipher(#[from] CipherError),

    #[error("Signing failed: {0}")]
    Signing(#[from] MetricError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
