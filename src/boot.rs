//! Boot assembly
//!
//! Wires one Flock node: stores, home manager, audit, registries,
//! resolvers, A2A server and client, migration engine, orchestrator,
//! transports, and the work-loop scheduler. Seeds per-agent workspaces
//! and manages the PID file.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::a2a::client::A2aClient;
use crate::a2a::server::A2aServer;
use crate::agent_card::AgentCardRegistry;
use crate::audit::AuditLog;
use crate::config::{DbBackend, FlockConfig, Topology};
use crate::database::{DatabaseConfig, DatabaseConnection, DatabasePath};
use crate::domain::{AgentAssignment, AgentCard, AgentLoopState, AgentRole, FlockAgentMeta, NodeEntry};
use crate::domain_types::{AgentId, NodeId};
use crate::error::{FlockError, Result};
use crate::executor::SessionExecutor;
use crate::home_manager::HomeManager;
use crate::migration::engine::MigrationEngine;
use crate::migration::orchestrator::MigrationOrchestrator;
use crate::migration::ticket_store::TicketStore;
use crate::migration::transport::{
    HttpMigrationTransport, MigrationRpcHandler, MigrationTargetService, MigrationTransport,
};
use crate::registry::{AssignmentStore, NodeRegistry};
use crate::routing::{CentralResolver, CentralSysadminResolver, PeerResolver, RoutingFabric};
use crate::scheduler::WorkLoopScheduler;
use crate::session::{EchoSession, SessionConfig, SessionLayer};
use crate::storage::FlockStores;
use crate::triage::TriageCaptureTable;

// Regenerated every boot.
const REGENERATED_FILES: [(&str, &str); 2] = [
    ("AGENTS.md", "# Agents\n\nFleet roster and conventions for this node.\n"),
    ("TOOLS.md", "# Tools\n\nTool catalog available to this agent.\n"),
];

// Seeded once; agent-owned afterwards.
const SEED_ONCE_FILES: [(&str, &str); 5] = [
    ("SOUL.md", "# Soul\n\nWho this agent is.\n"),
    ("IDENTITY.md", "# Identity\n\nName, role, and voice.\n"),
    ("MEMORY.md", "# Memory\n\nLong-lived notes.\n"),
    ("USER.md", "# User\n\nWhat is known about the operator.\n"),
    ("HEARTBEAT.md", "# Heartbeat\n\nPeriodic checklist.\n"),
];

/// One assembled Flock node
pub struct FlockNode {
    /// Effective configuration
    pub config: FlockConfig,
    /// Persistence substrate
    pub stores: FlockStores,
    /// Home lifecycle manager
    pub homes: HomeManager,
    /// Audit log
    pub audit: AuditLog,
    /// Node registry
    pub registry: NodeRegistry,
    /// Assignment store (central topology only)
    pub assignments: Option<AssignmentStore>,
    /// A2A front-end
    pub server: Arc<A2aServer>,
    /// Outbound client
    pub client: A2aClient,
    /// Migration engine
    pub engine: Arc<MigrationEngine>,
    /// Migration orchestrator
    pub orchestrator: Arc<MigrationOrchestrator>,
    /// Work-loop scheduler
    pub scheduler: Arc<WorkLoopScheduler>,
    /// Triage capture table
    pub triage: TriageCaptureTable,
    pid_path: PathBuf,
}

impl FlockNode {
    /// Boots a node from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the data directory, PID file, or store backend
    /// cannot be prepared. Config parsing itself never fails.
    pub async fn boot(config: FlockConfig) -> Result<Self> {
        let data_dir = config.data_dir_path();
        tokio::fs::create_dir_all(&data_dir).await?;

        let pid_path = data_dir.join("flock.pid");
        tokio::fs::write(&pid_path, std::process::id().to_string()).await?;

        let node_id = NodeId::try_new(config.node_id.clone())
            .map_err(|e| FlockError::validation("nodeId", e.to_string()))?;
        let local_endpoint = format!(
            "http://localhost:{}{}",
            config.gateway.port, config.base_path
        );

        let stores = match config.db_backend {
            DbBackend::Memory => FlockStores::in_memory(),
            backend => {
                if backend == DbBackend::Postgres {
                    warn!("postgres backend is not shipped; using the sqlite backend");
                }
                let path = DatabasePath::new(data_dir.join("flock.db"))?;
                let connection =
                    DatabaseConnection::initialize(DatabaseConfig::new(path)).await?;
                FlockStores::sqlite(connection).await?
            }
        };

        let homes = HomeManager::new(stores.homes.clone(), stores.transitions.clone());
        let audit = AuditLog::new(stores.audit.clone());
        let triage = TriageCaptureTable::new();

        let registry = NodeRegistry::new();
        for remote in &config.remote_nodes {
            match NodeId::try_new(remote.node_id.clone()) {
                Ok(remote_id) => {
                    registry.register(NodeEntry::online(remote_id, remote.a2a_endpoint.clone()));
                }
                Err(e) => warn!(node_id = %remote.node_id, error = %e, "skipping malformed remote node"),
            }
        }

        let assignments = matches!(config.topology, Topology::Central).then(AssignmentStore::new);

        let tickets = Arc::new(TicketStore::new());
        let engine = Arc::new(MigrationEngine::new(
            tickets,
            homes.clone(),
            audit.clone(),
            registry.clone(),
            assignments.clone(),
            node_id.clone(),
            local_endpoint.clone(),
        ));

        let tmp_dir = data_dir.join("tmp");
        let mut target_service = MigrationTargetService::new(
            node_id.clone(),
            tmp_dir.clone(),
            data_dir.clone(),
            homes.clone(),
        );
        if !config.remote_nodes.is_empty() {
            let mut peers: HashSet<NodeId> = config
                .remote_nodes
                .iter()
                .filter_map(|remote| NodeId::try_new(remote.node_id.clone()).ok())
                .collect();
            peers.insert(node_id.clone());
            target_service = target_service.with_known_peers(peers);
        }
        let migration_rpc = Arc::new(MigrationRpcHandler::new(
            Arc::new(target_service),
            engine.clone(),
        ));

        let cards = AgentCardRegistry::new();
        let server = Arc::new(A2aServer::new(
            node_id.clone(),
            config.base_path.clone(),
            cards.clone(),
            stores.tasks.clone(),
            engine.clone(),
            migration_rpc.clone(),
        ));

        // Per-node echo session signed with the node id; production
        // deployments swap in a provider-backed SessionLayer here.
        let session: Arc<dyn SessionLayer> = Arc::new(EchoSession::with_signature(node_id.as_str()));

        for agent_config in &config.gateway_agents {
            let Ok(agent_id) = AgentId::try_new(agent_config.id.clone()) else {
                warn!(id = %agent_config.id, "skipping agent with malformed id");
                continue;
            };
            let role = config.effective_role(agent_config);
            seed_workspace(&data_dir, &agent_id).await?;
            ensure_home_active(&homes, &agent_id, &node_id).await?;
            stores
                .agent_loops
                .init(&agent_id, AgentLoopState::Awake)
                .await?;
            if let Some(assignments) = &assignments {
                assignments.assign(AgentAssignment {
                    agent_id: agent_id.clone(),
                    node_id: node_id.clone(),
                    portable_path: config
                        .vaults_base_path
                        .as_ref()
                        .map(|base| format!("{base}/{agent_id}")),
                });
            }

            let session_config = SessionConfig {
                model: agent_config.model.clone().unwrap_or_else(|| "default".to_string()),
                system_prompt: agent_config.system_prompt.clone().unwrap_or_default(),
                tools: (role == AgentRole::Sysadmin)
                    .then(|| vec!["triage".to_string()])
                    .unwrap_or_default(),
                thinking_level: None,
                max_context_messages: 100,
            };
            let executor = Arc::new(SessionExecutor::new(
                agent_id.clone(),
                node_id.clone(),
                role,
                session.clone(),
                session_config,
                stores.tasks.clone(),
                audit.clone(),
                triage.clone(),
            ));
            server.register_agent(
                agent_id.clone(),
                AgentCard::minimal(&agent_id, format!("{local_endpoint}/a2a/{agent_id}")),
                FlockAgentMeta {
                    node_id: node_id.clone(),
                    role,
                    archetype: agent_config.archetype.clone(),
                },
                executor,
            );
        }

        let fabric = match config.topology {
            Topology::Peer => RoutingFabric::peer(Arc::new(PeerResolver::new(
                cards.clone(),
                registry.clone(),
            ))),
            Topology::Central => {
                let sysadmin = CentralSysadminResolver::new(
                    assignments.clone().unwrap_or_default(),
                    registry.clone(),
                    node_id.clone(),
                );
                RoutingFabric::central(Arc::new(CentralResolver), Arc::new(sysadmin))
            }
        };
        let client = A2aClient::new(server.clone(), fabric);

        let orchestrator = Arc::new(MigrationOrchestrator::new(
            engine.clone(),
            registry.clone(),
            Box::new(|endpoint: &str| {
                Arc::new(HttpMigrationTransport::new(endpoint)) as Arc<dyn MigrationTransport>
            }),
            data_dir.clone(),
            tmp_dir,
        ));
        migration_rpc.set_orchestrator(orchestrator.clone());

        let scheduler = Arc::new(
            WorkLoopScheduler::new(client.clone(), stores.agent_loops.clone())
                .with_migration_engine(engine.clone()),
        );

        info!(node_id = %node_id, agents = config.gateway_agents.len(), "node assembled");
        Ok(Self {
            config,
            stores,
            homes,
            audit,
            registry,
            assignments,
            server,
            client,
            engine,
            orchestrator,
            scheduler,
            triage,
            pid_path,
        })
    }

    /// Binds the A2A surface and serves until the process stops.
    ///
    /// # Errors
    ///
    /// Returns an error if the bind or the serve loop fails.
    pub async fn serve(&self) -> Result<()> {
        let addr: SocketAddr = ([0, 0, 0, 0], self.config.gateway.port).into();
        self.scheduler.start().await;
        self.server.clone().serve(addr).await
    }

    /// Graceful shutdown: stop ticking, release stores, drop the PID file
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.stores.close().await;
        if let Err(e) = tokio::fs::remove_file(&self.pid_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to remove pid file");
            }
        }
        info!("node shut down");
    }
}

async fn seed_workspace(data_dir: &std::path::Path, agent_id: &AgentId) -> Result<()> {
    let home = data_dir.join("agents").join(agent_id.as_str());
    tokio::fs::create_dir_all(home.join("memory")).await?;

    for (name, content) in REGENERATED_FILES {
        tokio::fs::write(home.join(name), content).await?;
    }
    for (name, content) in SEED_ONCE_FILES {
        let path = home.join(name);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tokio::fs::write(&path, content).await?;
        }
    }
    Ok(())
}

async fn ensure_home_active(
    homes: &HomeManager,
    agent_id: &AgentId,
    node_id: &NodeId,
) -> Result<()> {
    let home = match homes.create_home(agent_id.clone(), node_id.clone()).await {
        Ok(home) => home,
        // Restart: the home row already exists.
        Err(FlockError::Validation { .. }) => {
            homes
                .get(&crate::domain_types::HomeId::compose(agent_id, node_id))
                .await?
        }
        Err(e) => return Err(e),
    };
    if home.state.is_terminal() {
        warn!(home_id = %home.home_id, "home is retired; not reactivating");
        return Ok(());
    }
    if home.state != crate::domain::HomeState::Active {
        homes.activate(&home.home_id, "boot").await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayAgentConfig;
    use tempfile::tempdir;

    fn config_in(dir: &std::path::Path) -> FlockConfig {
        FlockConfig {
            data_dir: dir.to_string_lossy().to_string(),
            node_id: "node-a".to_string(),
            gateway_agents: vec![
                GatewayAgentConfig {
                    id: "worker-1".to_string(),
                    role: None,
                    archetype: None,
                    model: None,
                    system_prompt: None,
                },
                GatewayAgentConfig {
                    id: "sysadmin".to_string(),
                    role: Some(AgentRole::Sysadmin),
                    archetype: None,
                    model: None,
                    system_prompt: None,
                },
            ],
            ..FlockConfig::default()
        }
    }

    #[tokio::test]
    async fn test_should_seed_workspace_and_pid_when_booting() {
        let dir = tempdir().unwrap();
        let node = FlockNode::boot(config_in(dir.path())).await.unwrap();

        assert!(dir.path().join("flock.pid").exists());
        let home = dir.path().join("agents/worker-1");
        for file in ["AGENTS.md", "TOOLS.md", "SOUL.md", "IDENTITY.md", "MEMORY.md"] {
            assert!(home.join(file).exists(), "{file} should be seeded");
        }
        assert!(home.join("memory").is_dir());

        node.shutdown().await;
        assert!(!dir.path().join("flock.pid").exists());
    }

    #[tokio::test]
    async fn test_should_preserve_agent_files_when_rebooting() {
        let dir = tempdir().unwrap();
        let node = FlockNode::boot(config_in(dir.path())).await.unwrap();
        node.shutdown().await;

        let soul = dir.path().join("agents/worker-1/SOUL.md");
        tokio::fs::write(&soul, "# Soul\n\nhand-written identity\n")
            .await
            .unwrap();
        let tools = dir.path().join("agents/worker-1/TOOLS.md");
        tokio::fs::write(&tools, "stale tool list").await.unwrap();

        let node = FlockNode::boot(config_in(dir.path())).await.unwrap();
        // Seed-once survives; regenerated files are rewritten.
        let soul_content = tokio::fs::read_to_string(&soul).await.unwrap();
        assert!(soul_content.contains("hand-written identity"));
        let tools_content = tokio::fs::read_to_string(&tools).await.unwrap();
        assert!(!tools_content.contains("stale"));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_should_answer_local_send_when_node_is_booted() {
        let dir = tempdir().unwrap();
        let node = FlockNode::boot(config_in(dir.path())).await.unwrap();
        let from = AgentId::try_new("external".to_string()).unwrap();
        let to = AgentId::try_new("worker-1".to_string()).unwrap();
        let view = node.client.send_message(&from, &to, "hello", None).await.unwrap();
        assert_eq!(view.status.state, crate::domain::TaskState::Completed);
        assert!(view.response_text().unwrap().contains("hello"));
        node.shutdown().await;
    }
}
