//! Core error types for Tally.

use crate::MetricKind;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while validating, applying or reading metrics
#[derive(Debug, Error)]
pub enum MetricError {
    /// Numeric text could not be parsed for the given kind
    #[error("cannot parse {kind} value {text:?}")]
    Parse { kind: MetricKind, text: String },

    /// The field required by the record's kind is missing
    #[error("{kind} metric {id:?} is missing its {field} field")]
    AbsentField {
        id: String,
        kind: MetricKind,
        field: &'static str,
    },

    /// Hash sum did not match the record contents
    #[error("hash sum not matched for metric {0:?}")]
    Integrity(String),

    /// The HMAC key could not be used
    #[error("integrity key rejected: {0}")]
    IntegrityKey(String),

    /// Metric is not present in the store
    #[error("metric not found: {kind} {id:?}")]
    NotFound { kind: MetricKind, id: String },

    /// Kind is neither counter nor gauge
    #[error("unsupported metric kind: {0:?}")]
    UnsupportedKind(String),

    /// Metric name is empty
    #[error("metric name must not be empty")]
    EmptyName,

    /// Encryption or decryption failure
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// Caller address is outside the trusted subnet
    #[error("access denied: {0} is outside the trusted subnet")]
    Authorization(IpAddr),
}

/// Errors from the chunked RSA-OAEP layer
#[derive(Debug, Error)]
pub enum CipherError {
    /// Key is too small to carry any plaintext chunk
    #[error("message too large for key: {key_bits}-bit key (minimum {min_bits} bits)")]
    MessageTooLarge { key_bits: usize, min_bits: usize },

    /// A ciphertext chunk was malformed or encrypted for another key
    #[error("decryption error: {0}")]
    Decryption(String),

    /// Encryption of a chunk failed
    #[error("encryption error: {0}")]
    Encryption(String),

    /// PEM/DER key could not be parsed
    #[error("invalid key in {path}: {message}")]
    Key { path: PathBuf, message: String },

    /// Key file could not be read
    #[error("failed to read key {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from loading configuration files
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("invalid trusted subnet {0:?}")]
    Subnet(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse() {
        let err = MetricError::Parse {
            kind: MetricKind::Counter,
            text: "abc".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("counter"));
        assert!(msg.contains("abc"));
    }

    #[test]
    fn test_error_display_absent_field() {
        let err = MetricError::AbsentField {
            id: "Alloc".to_string(),
            kind: MetricKind::Gauge,
            field: "value",
        };
        assert!(err.to_string().contains("missing its value field"));
    }

    #[test]
    fn test_cipher_error_converts() {
        let err: MetricError = CipherError::Decryption("bad chunk".to_string()).into();
        assert!(matches!(err, MetricError::Cipher(_)));
        assert!(err.to_string().contains("bad chunk"));
    }

    #[test]
    fn test_error_display_not_found() {
        let err = MetricError::NotFound {
            kind: MetricKind::Counter,
            id: "x".to_string(),
        };
        assert!(err.to_string().contains("not found"));
    }
}
