//! Node configuration
//!
//! Configs arrive either as a parsed JSON mapping (in-process embedding)
//! or from file: `$FLOCK_CONFIG`, then `./flock.json`, then
//! `~/.flock/flock.json`. Parsing is total: unknown fields are ignored
//! and malformed entries fall back to their defaults with a warning.
//! Config never crashes a node.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::AgentRole;

/// Which store backend a node runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbBackend {
    /// In-memory (testing, ephemeral)
    #[default]
    Memory,
    /// Embedded SQLite with WAL
    Sqlite,
    /// Accepted by the parser; served by the SQLite backend with a warning
    Postgres,
}

/// Which routing topology a node participates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// Every node equal; agents live where created
    #[default]
    Peer,
    /// One co-located host serves all agent sessions
    Central,
}

/// One statically configured remote node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteNodeConfig {
    /// Node id
    pub node_id: String,
    /// Base A2A endpoint
    pub a2a_endpoint: String,
}

/// One agent to host at boot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayAgentConfig {
    /// Agent id
    pub id: String,
    /// Declared role (workers by default)
    #[serde(default)]
    pub role: Option<AgentRole>,
    /// Prompt-family label
    #[serde(default)]
    pub archetype: Option<String>,
    /// Model override
    #[serde(default)]
    pub model: Option<String>,
    /// System prompt override
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// HTTP gateway settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared bearer token, if required
    #[serde(default)]
    pub token: Option<String>,
}

fn default_port() -> u16 {
    7401
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            token: None,
        }
    }
}

/// Full node configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlockConfig {
    /// Root of the node's on-disk state
    pub data_dir: String,
    /// Store backend
    pub db_backend: DbBackend,
    /// Routing topology
    pub topology: Topology,
    /// This node's id
    pub node_id: String,
    /// Statically known peers
    pub remote_nodes: Vec<RemoteNodeConfig>,
    /// Agents to host at boot
    pub gateway_agents: Vec<GatewayAgentConfig>,
    /// Agents forced to role orchestrator regardless of declared role
    pub orchestrator_ids: Vec<String>,
    /// HTTP gateway settings
    pub gateway: GatewayConfig,
    /// Base of the logical vault paths, when vaults are in use
    pub vaults_base_path: Option<String>,
    /// URL base path of the A2A surface
    pub base_path: String,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            data_dir: ".flock".to_string(),
            db_backend: DbBackend::default(),
            topology: Topology::default(),
            node_id: "local".to_string(),
            remote_nodes: Vec::new(),
            gateway_agents: Vec::new(),
            orchestrator_ids: Vec::new(),
            gateway: GatewayConfig::default(),
            vaults_base_path: None,
            base_path: "/flock".to_string(),
        }
    }
}

fn lenient<T: serde::de::DeserializeOwned + Default>(
    value: &serde_json::Value,
    key: &str,
) -> Option<T> {
    let raw = value.get(key)?;
    match serde_json::from_value(raw.clone()) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!(key, error = %e, "malformed config entry, using default");
            None
        }
    }
}

impl FlockConfig {
    /// Builds a config from a parsed JSON mapping.
    ///
    /// Field-wise lenient: each malformed entry falls back to its default
    /// independently.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let defaults = Self::default();
        if !value.is_object() {
            if !value.is_null() {
                warn!("config root is not an object, using defaults");
            }
            return defaults;
        }
        Self {
            data_dir: lenient(value, "dataDir").unwrap_or(defaults.data_dir),
            db_backend: lenient(value, "dbBackend").unwrap_or(defaults.db_backend),
            topology: lenient(value, "topology").unwrap_or(defaults.topology),
            node_id: lenient(value, "nodeId").unwrap_or(defaults.node_id),
            remote_nodes: lenient(value, "remoteNodes").unwrap_or_default(),
            gateway_agents: lenient(value, "gatewayAgents").unwrap_or_default(),
            orchestrator_ids: lenient(value, "orchestratorIds").unwrap_or_default(),
            gateway: lenient(value, "gateway").unwrap_or(defaults.gateway),
            vaults_base_path: lenient(value, "vaultsBasePath").unwrap_or(defaults.vaults_base_path),
            base_path: lenient(value, "basePath").unwrap_or(defaults.base_path),
        }
    }

    /// Loads config from the standard locations:
    /// `$FLOCK_CONFIG`, then `./flock.json`, then `~/.flock/flock.json`.
    ///
    /// Missing or unreadable files fall through to the next location;
    /// nothing found means defaults.
    pub fn load() -> Self {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Ok(env_path) = std::env::var("FLOCK_CONFIG") {
            if !env_path.is_empty() {
                candidates.push(PathBuf::from(env_path));
            }
        }
        candidates.push(PathBuf::from("./flock.json"));
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(Path::new(&home).join(".flock").join("flock.json"));
        }

        for candidate in candidates {
            match std::fs::read_to_string(&candidate) {
                Ok(raw) => match serde_json::from_str::<serde_json::Value>(&raw) {
                    Ok(value) => return Self::from_value(&value),
                    Err(e) => {
                        warn!(path = %candidate.display(), error = %e, "unparseable config file, trying next");
                    }
                },
                Err(_) => continue,
            }
        }
        Self::default()
    }

    /// The node's data directory as a path
    pub fn data_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    /// Effective role for a configured agent, honoring `orchestrator_ids`
    pub fn effective_role(&self, agent: &GatewayAgentConfig) -> AgentRole {
        if self.orchestrator_ids.iter().any(|id| id == &agent.id) {
            AgentRole::Orchestrator
        } else {
            agent.role.unwrap_or_default()
        }
    }
}
