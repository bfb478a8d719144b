//! Tally Server
//!
//! Accepts metric updates over HTTP and RPC, keeps them in memory and
//! persists them to a snapshot file or a database.

mod config;
mod daemon;
mod handler;
mod http;
mod state;

pub use config::{ServerArgs, ServerConfig, ServerFile};
pub use daemon::Daemon;
pub use handler::RpcHandler;
pub use http::{build_router, status_for, HttpError, X_REAL_IP};
pub use state::ServerState;
