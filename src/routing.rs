//! Routing fabric: topology-aware resolvers
//!
//! Two resolvers share one signature: given a target agent, decide whether
//! delivery is local dispatch or remote HTTP. The central topology adds a
//! specialized resolver for the distinguished `sysadmin` role that follows
//! the assignment store instead of the agent directory.

use std::sync::Arc;

use crate::agent_card::AgentCardRegistry;
use crate::domain::NodeStatus;
use crate::domain_types::{AgentId, NodeId};
use crate::registry::{AssignmentStore, NodeRegistry};

/// Where a message should be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Dispatch in-process to the local A2A server
    Local,
    /// POST to a remote node
    Remote {
        /// Base A2A endpoint of the remote node
        endpoint: String,
        /// The remote node's id
        node_id: NodeId,
    },
}

/// Decides local vs remote for a target agent
pub trait Resolver: Send + Sync {
    /// Resolves the delivery target for `agent_id`
    fn resolve(&self, agent_id: &AgentId) -> Resolution;
}

/// Peer topology: every node equal, agents live where they were created.
///
/// Resolution order: local server hosts the agent; local registry has an
/// online entry; parent registry lookup (handled inside the registry);
/// fall back to local and let the server answer 404.
pub struct PeerResolver {
    cards: AgentCardRegistry,
    registry: NodeRegistry,
}

impl PeerResolver {
    /// Creates a resolver over the local directory and node registry
    pub fn new(cards: AgentCardRegistry, registry: NodeRegistry) -> Self {
        Self { cards, registry }
    }
}

impl Resolver for PeerResolver {
    fn resolve(&self, agent_id: &AgentId) -> Resolution {
        if self.cards.hosts(agent_id) {
            return Resolution::Local;
        }
        if let Some(entry) = self.registry.find_node_for_agent(agent_id) {
            if entry.status == NodeStatus::Online {
                return Resolution::Remote {
                    endpoint: entry.a2a_endpoint,
                    node_id: entry.node_id,
                };
            }
        }
        Resolution::Local
    }
}

/// Central topology: one co-located host serves all worker agents
pub struct CentralResolver;

impl Resolver for CentralResolver {
    fn resolve(&self, _agent_id: &AgentId) -> Resolution {
        Resolution::Local
    }
}

/// Decides where a sysadmin call from a given caller should land
pub trait SysadminResolver: Send + Sync {
    /// Resolves the sysadmin serving `caller`
    fn resolve_for_caller(&self, caller: &AgentId) -> Resolution;
}

/// Central-topology sysadmin resolver.
///
/// A caller assigned to a remote node gets that node's local sysadmin; a
/// change in the assignment store re-routes the very next call.
pub struct CentralSysadminResolver {
    assignments: AssignmentStore,
    registry: NodeRegistry,
    local_node: NodeId,
}

impl CentralSysadminResolver {
    /// Creates a resolver over the assignment store and node registry
    pub fn new(assignments: AssignmentStore, registry: NodeRegistry, local_node: NodeId) -> Self {
        Self {
            assignments,
            registry,
            local_node,
        }
    }
}

impl SysadminResolver for CentralSysadminResolver {
    fn resolve_for_caller(&self, caller: &AgentId) -> Resolution {
        let Some(assignment) = self.assignments.get(caller) else {
            return Resolution::Local;
        };
        if assignment.node_id == self.local_node {
            return Resolution::Local;
        }
        match self.registry.get(&assignment.node_id) {
            Some(entry) if entry.status == NodeStatus::Online => Resolution::Remote {
                endpoint: entry.a2a_endpoint,
                node_id: entry.node_id,
            },
            _ => Resolution::Local,
        }
    }
}

/// Resolver bundle the A2A client consults per message kind
#[derive(Clone)]
pub struct RoutingFabric {
    resolver: Arc<dyn Resolver>,
    sysadmin: Option<Arc<dyn SysadminResolver>>,
}

impl RoutingFabric {
    /// Peer-topology fabric: one resolver for every message kind
    pub fn peer(resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            sysadmin: None,
        }
    }

    /// Central-topology fabric: worker resolver plus the sysadmin resolver
    pub fn central(resolver: Arc<dyn Resolver>, sysadmin: Arc<dyn SysadminResolver>) -> Self {
        Self {
            resolver,
            sysadmin: Some(sysadmin),
        }
    }

    /// Resolves a message from `from` to `to`.
    ///
    /// The sysadmin resolver is consulted iff one is configured and the
    /// target is the distinguished sysadmin role.
    pub fn resolve(&self, from: &AgentId, to: &AgentId) -> Resolution {
        if to.is_sysadmin() {
            if let Some(sysadmin) = &self.sysadmin {
                return sysadmin.resolve_for_caller(from);
            }
        }
        self.resolver.resolve(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentAssignment, AgentCard, AgentRole, FlockAgentMeta, NodeEntry};

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    fn node(name: &str) -> NodeId {
        NodeId::try_new(name.to_string()).unwrap()
    }

    fn cards_with(agent_name: &str) -> AgentCardRegistry {
        let cards = AgentCardRegistry::new();
        let id = agent(agent_name);
        cards.publish(
            id.clone(),
            AgentCard::minimal(&id, "http://localhost:7401/flock"),
            FlockAgentMeta {
                node_id: node("local"),
                role: AgentRole::Worker,
                archetype: None,
            },
        );
        cards
    }

    #[test]
    fn test_should_resolve_local_when_card_registry_hosts_agent() {
        let resolver = PeerResolver::new(cards_with("worker-1"), NodeRegistry::new());
        assert_eq!(resolver.resolve(&agent("worker-1")), Resolution::Local);
    }

    #[test]
    fn test_should_resolve_remote_when_registry_lists_online_node() {
        let registry = NodeRegistry::new();
        let mut entry = NodeEntry::online(node("node-b"), "http://b:7401/flock");
        entry.agent_ids.push(agent("worker-2"));
        registry.register(entry);

        let resolver = PeerResolver::new(AgentCardRegistry::new(), registry);
        assert_eq!(
            resolver.resolve(&agent("worker-2")),
            Resolution::Remote {
                endpoint: "http://b:7401/flock".to_string(),
                node_id: node("node-b"),
            }
        );
    }

    #[test]
    fn test_should_fall_back_to_local_when_agent_is_unknown_everywhere() {
        let resolver = PeerResolver::new(AgentCardRegistry::new(), NodeRegistry::new());
        // Local server answers 404 for the unknown agent.
        assert_eq!(resolver.resolve(&agent("ghost")), Resolution::Local);
    }

    #[test]
    fn test_should_route_sysadmin_remotely_when_caller_is_assigned_elsewhere() {
        let assignments = AssignmentStore::new();
        assignments.assign(AgentAssignment {
            agent_id: agent("worker-alpha"),
            node_id: node("worker-node-2"),
            portable_path: None,
        });
        let registry = NodeRegistry::new();
        registry.register(NodeEntry::online(
            node("worker-node-2"),
            "http://wn2:7401/flock",
        ));

        let fabric = RoutingFabric::central(
            Arc::new(CentralResolver),
            Arc::new(CentralSysadminResolver::new(
                assignments,
                registry,
                node("central"),
            )),
        );

        // Worker traffic stays local in central mode.
        assert_eq!(
            fabric.resolve(&agent("worker-alpha"), &agent("worker-beta")),
            Resolution::Local
        );
        // Sysadmin traffic follows the assignment.
        assert_eq!(
            fabric.resolve(&agent("worker-alpha"), &agent("sysadmin")),
            Resolution::Remote {
                endpoint: "http://wn2:7401/flock".to_string(),
                node_id: node("worker-node-2"),
            }
        );
    }

    #[test]
    fn test_should_keep_sysadmin_local_when_caller_is_assigned_to_local_node() {
        let assignments = AssignmentStore::new();
        assignments.assign(AgentAssignment {
            agent_id: agent("worker-alpha"),
            node_id: node("central"),
            portable_path: None,
        });
        let fabric = RoutingFabric::central(
            Arc::new(CentralResolver),
            Arc::new(CentralSysadminResolver::new(
                assignments,
                NodeRegistry::new(),
                node("central"),
            )),
        );
        assert_eq!(
            fabric.resolve(&agent("worker-alpha"), &agent("sysadmin")),
            Resolution::Local
        );
    }
}
