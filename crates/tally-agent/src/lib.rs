//! Tally Agent
//!
//! Samples host and process statistics on one interval and reports them to
//! the Tally server on another.

mod agent;
mod collector;
mod config;
mod error;
mod reporter;

pub use agent::{build_transport, Agent};
pub use collector::{Collector, POLL_COUNT, RANDOM_VALUE};
pub use config::{AgentArgs, AgentConfig, AgentFile, TransportKind};
pub use error::ReportError;
pub use reporter::{HttpTransport, Reporter, RpcTransport, Transport, X_REAL_IP};
