//! Node topology and agent directory types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain_types::{AgentId, NodeId};

/// Liveness of a remote node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Reachable
    Online,
    /// Known but unreachable
    Offline,
}

/// One entry in the node registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// Node id
    pub node_id: NodeId,
    /// Base A2A endpoint (e.g. `http://host:7401/flock`)
    pub a2a_endpoint: String,
    /// Liveness
    pub status: NodeStatus,
    /// Last time the node was heard from
    pub last_seen: DateTime<Utc>,
    /// Agents the node reports hosting
    pub agent_ids: Vec<AgentId>,
}

impl NodeEntry {
    /// Creates an online entry heard from just now
    pub fn online(node_id: NodeId, a2a_endpoint: impl Into<String>) -> Self {
        Self {
            node_id,
            a2a_endpoint: a2a_endpoint.into(),
            status: NodeStatus::Online,
            last_seen: Utc::now(),
            agent_ids: Vec::new(),
        }
    }
}

/// The logical node owning an agent (central topology).
///
/// Distinct from where the agent's LLM session runs: in central mode all
/// sessions are co-located, but sysadmin traffic follows this assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAssignment {
    /// The agent
    pub agent_id: AgentId,
    /// The owning node
    pub node_id: NodeId,
    /// Logical vault path for the agent's portable storage, if any
    pub portable_path: Option<String>,
}

/// Role an agent plays in the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Ordinary LLM-backed worker
    #[default]
    Worker,
    /// Privileged per-node administrator
    Sysadmin,
    /// Fleet coordinator
    Orchestrator,
    /// Internal infrastructure agent
    System,
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Worker => "worker",
            Self::Sysadmin => "sysadmin",
            Self::Orchestrator => "orchestrator",
            Self::System => "system",
        };
        write!(f, "{s}")
    }
}

/// Public A2A agent card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    /// Display name
    pub name: String,
    /// One-line description
    pub description: String,
    /// Where the agent can be reached
    pub url: String,
    /// Card schema version
    pub version: String,
    /// Capability tags the agent advertises
    #[serde(default)]
    pub skills: Vec<String>,
}

impl AgentCard {
    /// Minimal card for a locally hosted agent
    pub fn minimal(agent_id: &AgentId, endpoint: impl Into<String>) -> Self {
        Self {
            name: agent_id.to_string(),
            description: format!("Flock agent {agent_id}"),
            url: endpoint.into(),
            version: "0.1.0".to_string(),
            skills: Vec::new(),
        }
    }
}

/// Flock-specific sidecar metadata published next to the card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlockAgentMeta {
    /// Node hosting the agent
    pub node_id: NodeId,
    /// Fleet role
    pub role: AgentRole,
    /// Optional archetype label (prompt family)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype: Option<String>,
}
