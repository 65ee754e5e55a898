//! A2A peer protocol: JSON-RPC server, outbound client, wire types
//!
//! The HTTP/JSON-RPC layer Flock nodes speak to each other, on top of an
//! agent-card directory.

pub mod client;
pub mod rpc;
pub mod server;

pub use client::A2aClient;
pub use rpc::{Artifact, JsonRpcError, JsonRpcRequest, JsonRpcResponse, TaskView};
pub use server::A2aServer;
