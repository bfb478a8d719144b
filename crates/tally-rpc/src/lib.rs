//! Tally RPC Protocol and Client/Server
//!
//! This crate provides the binary RPC protocol definitions and the TCP
//! client/server used between agents and the Tally server.

mod client;
mod error;
mod protocol;
mod server;

pub use client::RpcClient;
pub use error::RpcError;
pub use protocol::*;
pub use server::{RequestHandler, RpcServer};
