//! Tally Core Components
//!
//! This crate provides the pieces shared by the Tally server and agent:
//! the metric record model, the in-memory store, HMAC integrity tags,
//! chunked RSA encryption, trusted-subnet checks and shutdown plumbing.

pub mod cipher;
pub mod config;
mod error;
pub mod integrity;
pub mod lifecycle;
mod record;
mod store;
mod subnet;

pub use cipher::{Decrypter, Encrypter};
pub use error::{CipherError, ConfigError, MetricError};
pub use lifecycle::Lifecycle;
pub use record::{MetricKind, MetricRecord, MetricValue, Snapshot};
pub use store::{BatchFailure, BatchOutcome, Store};
pub use subnet::{admit, TrustedSubnet};
