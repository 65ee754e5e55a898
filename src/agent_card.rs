//! Local agent-card registry
//!
//! Public directory of the agents this node hosts: the A2A card plus the
//! Flock metadata sidecar. Written during boot and by admin tools; read on
//! every card lookup and by the resolvers.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::domain::{AgentCard, FlockAgentMeta};
use crate::domain_types::AgentId;

/// One directory entry: card plus sidecar
#[derive(Debug, Clone, Serialize)]
pub struct CardEntry {
    /// Public A2A card
    pub card: AgentCard,
    /// Flock metadata sidecar
    pub meta: FlockAgentMeta,
}

/// Directory of locally hosted agents
#[derive(Clone, Default)]
pub struct AgentCardRegistry {
    entries: Arc<DashMap<AgentId, CardEntry>>,
}

impl AgentCardRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes (or replaces) an agent's card
    pub fn publish(&self, agent_id: AgentId, card: AgentCard, meta: FlockAgentMeta) {
        self.entries.insert(agent_id, CardEntry { card, meta });
    }

    /// Fetches one agent's entry
    pub fn get(&self, agent_id: &AgentId) -> Option<CardEntry> {
        self.entries.get(agent_id).map(|entry| entry.clone())
    }

    /// Whether this node hosts the agent
    pub fn hosts(&self, agent_id: &AgentId) -> bool {
        self.entries.contains_key(agent_id)
    }

    /// All local agents, sorted by id for stable directory output
    pub fn list(&self) -> Vec<(AgentId, CardEntry)> {
        let mut entries: Vec<(AgentId, CardEntry)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Removes an agent's card (teardown or migration away)
    pub fn remove(&self, agent_id: &AgentId) {
        self.entries.remove(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AgentRole;
    use crate::domain_types::NodeId;

    fn publish(registry: &AgentCardRegistry, name: &str) {
        let agent = AgentId::try_new(name.to_string()).unwrap();
        let card = AgentCard::minimal(&agent, format!("http://localhost:7401/flock/a2a/{name}"));
        registry.publish(
            agent,
            card,
            FlockAgentMeta {
                node_id: NodeId::try_new("local".to_string()).unwrap(),
                role: AgentRole::Worker,
                archetype: None,
            },
        );
    }

    #[test]
    fn test_should_report_hosting_when_card_is_published() {
        let registry = AgentCardRegistry::new();
        publish(&registry, "worker-1");
        assert!(registry.hosts(&AgentId::try_new("worker-1".to_string()).unwrap()));
        assert!(!registry.hosts(&AgentId::try_new("worker-2".to_string()).unwrap()));
    }

    #[test]
    fn test_should_list_agents_sorted_when_several_are_published() {
        let registry = AgentCardRegistry::new();
        publish(&registry, "zeta");
        publish(&registry, "alpha");
        let ids: Vec<String> = registry
            .list()
            .into_iter()
            .map(|(id, _)| id.to_string())
            .collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }
}
