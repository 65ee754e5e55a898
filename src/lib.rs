//! # Flock - Distributed Agent Control Plane
//!
//! Flock is a control plane for a fleet of long-lived LLM-backed agent
//! processes spread across one or more nodes. Agents exchange typed
//! messages over an HTTP/JSON-RPC peer protocol (A2A), and individual
//! agents can be live-migrated between nodes while preserving their
//! on-disk state.
//!
//! ## Core subsystems
//!
//! - **Routing fabric** - per-node registry of local agents plus
//!   topology-aware resolvers ([`routing`])
//! - **Peer protocol** - JSON-RPC message/task layer over an agent-card
//!   directory ([`a2a`])
//! - **Migration engine** - 13-phase ticket FSM, snapshot+checksum
//!   transfer, rehydration with path-traversal defense, rollback, and the
//!   frozen guard ([`migration`])
//! - **Persistence substrate** - backend-neutral stores with in-memory
//!   and SQLite/WAL implementations ([`storage`])
//! - **Work-loop scheduler** - periodic ticker over AWAKE/REACTIVE agents
//!   ([`scheduler`])
//!
//! ## Boot
//!
//! ```rust,no_run
//! use flock::boot::FlockNode;
//! use flock::config::FlockConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let node = FlockNode::boot(FlockConfig::load()).await?;
//!     node.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod a2a;
pub mod agent_card;
pub mod audit;
pub mod boot;
pub mod config;
pub mod database;
pub mod domain;
pub mod domain_types;
pub mod error;
pub mod executor;
pub mod handshake;
pub mod home_manager;
pub mod migration;
pub mod registry;
pub mod routing;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod triage;

pub use crate::error::{FlockError, Result};
