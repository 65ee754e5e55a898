//! Node registry and agent assignment store
//!
//! The registry is a process-wide in-memory index of remote node endpoints
//! with liveness, with an optional parent registry for hierarchical
//! deployments. The assignment store (central topology only) records which
//! logical node owns each agent; changing an assignment immediately
//! re-routes future sysadmin requests from that agent.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{info, instrument};

use crate::domain::{AgentAssignment, NodeEntry, NodeStatus};
use crate::domain_types::{AgentId, NodeId};
use crate::error::{FlockError, Result};

/// Process-wide index of reachable nodes
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: Arc<DashMap<NodeId, NodeEntry>>,
    parent: Option<Arc<NodeRegistry>>,
}

impl NodeRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that falls back to `parent` for unknown agents
    pub fn with_parent(parent: Arc<NodeRegistry>) -> Self {
        Self {
            nodes: Arc::new(DashMap::new()),
            parent: Some(parent),
        }
    }

    /// Registers (or replaces) a node entry
    #[instrument(skip(self), fields(node_id = %entry.node_id))]
    pub fn register(&self, entry: NodeEntry) {
        info!(endpoint = %entry.a2a_endpoint, "node registered");
        self.nodes.insert(entry.node_id.clone(), entry);
    }

    /// Fetches one node entry
    pub fn get(&self, node_id: &NodeId) -> Option<NodeEntry> {
        self.nodes.get(node_id).map(|entry| entry.clone())
    }

    /// Replaces a node's reported agent list, stamping `last_seen`
    pub fn update_agents(&self, node_id: &NodeId, agent_ids: Vec<AgentId>) -> Result<()> {
        let mut entry = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| FlockError::not_found("node", node_id.as_str()))?;
        entry.agent_ids = agent_ids;
        entry.last_seen = Utc::now();
        Ok(())
    }

    /// Adds one agent to a node's list, registering the node first if needed
    pub fn add_agent(&self, node_id: &NodeId, endpoint: &str, agent_id: &AgentId) {
        let mut entry = self
            .nodes
            .entry(node_id.clone())
            .or_insert_with(|| NodeEntry::online(node_id.clone(), endpoint));
        if !entry.agent_ids.contains(agent_id) {
            entry.agent_ids.push(agent_id.clone());
        }
        entry.last_seen = Utc::now();
    }

    /// Removes one agent from a node's list, if present
    pub fn remove_agent(&self, node_id: &NodeId, agent_id: &AgentId) {
        if let Some(mut entry) = self.nodes.get_mut(node_id) {
            entry.agent_ids.retain(|id| id != agent_id);
        }
    }

    /// Marks a node offline
    pub fn mark_offline(&self, node_id: &NodeId) {
        if let Some(mut entry) = self.nodes.get_mut(node_id) {
            entry.status = NodeStatus::Offline;
        }
    }

    /// First online node whose agent list contains the agent.
    ///
    /// Falls back to the parent registry when configured and nothing local
    /// matches.
    pub fn find_node_for_agent(&self, agent_id: &AgentId) -> Option<NodeEntry> {
        let local = self
            .nodes
            .iter()
            .filter(|entry| entry.status == NodeStatus::Online)
            .find(|entry| entry.agent_ids.contains(agent_id))
            .map(|entry| entry.clone());
        local.or_else(|| {
            self.parent
                .as_ref()
                .and_then(|parent| parent.find_node_for_agent(agent_id))
        })
    }

    /// All known nodes
    pub fn list(&self) -> Vec<NodeEntry> {
        let mut nodes: Vec<NodeEntry> = self.nodes.iter().map(|entry| entry.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }
}

/// Central-topology map `agent -> owning node`
#[derive(Clone, Default)]
pub struct AssignmentStore {
    assignments: Arc<DashMap<AgentId, AgentAssignment>>,
}

impl AssignmentStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Records (or replaces) an assignment
    pub fn assign(&self, assignment: AgentAssignment) {
        self.assignments
            .insert(assignment.agent_id.clone(), assignment);
    }

    /// Fetches the assignment for an agent
    pub fn get(&self, agent_id: &AgentId) -> Option<AgentAssignment> {
        self.assignments.get(agent_id).map(|entry| entry.clone())
    }

    /// Moves an agent to a new node, preserving `portable_path`.
    ///
    /// The stored path names the agent's logical vault, not the physical
    /// home directory, so it stays valid across the move.
    #[instrument(skip(self), fields(agent_id = %agent_id, new_node_id = %new_node_id))]
    pub fn reassign(&self, agent_id: &AgentId, new_node_id: NodeId) -> Result<AgentAssignment> {
        let mut entry = self
            .assignments
            .get_mut(agent_id)
            .ok_or_else(|| FlockError::not_found("assignment", agent_id.as_str()))?;
        entry.node_id = new_node_id;
        info!("agent reassigned");
        Ok(entry.clone())
    }

    /// Removes an assignment
    pub fn remove(&self, agent_id: &AgentId) {
        self.assignments.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    fn node(name: &str) -> NodeId {
        NodeId::try_new(name.to_string()).unwrap()
    }

    #[test]
    fn test_should_find_first_online_node_when_agent_is_listed() {
        let registry = NodeRegistry::new();
        let mut offline = NodeEntry::online(node("node-a"), "http://a:7401/flock");
        offline.status = NodeStatus::Offline;
        offline.agent_ids.push(agent("worker-1"));
        registry.register(offline);

        let mut online = NodeEntry::online(node("node-b"), "http://b:7401/flock");
        online.agent_ids.push(agent("worker-1"));
        registry.register(online);

        let found = registry.find_node_for_agent(&agent("worker-1")).unwrap();
        assert_eq!(found.node_id, node("node-b"));
    }

    #[test]
    fn test_should_fall_back_to_parent_when_local_registry_misses() {
        let parent = Arc::new(NodeRegistry::new());
        let mut entry = NodeEntry::online(node("hub"), "http://hub:7401/flock");
        entry.agent_ids.push(agent("worker-9"));
        parent.register(entry);

        let child = NodeRegistry::with_parent(parent);
        let found = child.find_node_for_agent(&agent("worker-9")).unwrap();
        assert_eq!(found.node_id, node("hub"));
    }

    #[test]
    fn test_should_preserve_portable_path_when_reassigning() {
        let store = AssignmentStore::new();
        store.assign(AgentAssignment {
            agent_id: agent("worker-1"),
            node_id: node("node-a"),
            portable_path: Some("/vaults/worker-1".to_string()),
        });

        let updated = store.reassign(&agent("worker-1"), node("node-b")).unwrap();
        assert_eq!(updated.node_id, node("node-b"));
        assert_eq!(updated.portable_path.as_deref(), Some("/vaults/worker-1"));
    }

    #[test]
    fn test_should_fail_reassign_when_agent_is_unknown() {
        let store = AssignmentStore::new();
        assert!(store.reassign(&agent("ghost"), node("node-b")).is_err());
    }

    #[test]
    fn test_should_drop_agent_from_source_when_removing() {
        let registry = NodeRegistry::new();
        registry.add_agent(&node("node-a"), "http://a:7401/flock", &agent("worker-1"));
        registry.remove_agent(&node("node-a"), &agent("worker-1"));
        assert!(registry.find_node_for_agent(&agent("worker-1")).is_none());
    }
}
