//! Work-loop scheduler
//!
//! A periodic ticker drives AWAKE agents with a synthetic tick message on
//! the fast cadence (default 60 s) and REACTIVE agents on the slow
//! cadence (default 5 min). SLEEP agents are skipped. Each delivered tick
//! stamps `last_tick_at`; failures are retried on the next interval.
//! `stop()` is cooperative: no new ticks start, but an in-flight pass is
//! never interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::a2a::client::A2aClient;
use crate::domain::{AgentLoopState, FlockMeta, FlockType};
use crate::domain_types::AgentId;
use crate::migration::engine::MigrationEngine;
use crate::storage::AgentLoopStore;

/// Fast cadence for AWAKE agents
pub const DEFAULT_AWAKE_INTERVAL: Duration = Duration::from_secs(60);
/// Slow cadence for REACTIVE agents
pub const DEFAULT_REACTIVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Periodic ticker over the agent fleet
pub struct WorkLoopScheduler {
    client: A2aClient,
    loops: Arc<dyn AgentLoopStore>,
    awake_interval: Duration,
    reactive_interval: Duration,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    tick_sender: AgentId,
    engine: Option<Arc<MigrationEngine>>,
}

impl WorkLoopScheduler {
    /// Creates a scheduler with the default cadences
    ///
    /// # Panics
    ///
    /// Never panics: the static sender id is valid.
    pub fn new(client: A2aClient, loops: Arc<dyn AgentLoopStore>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            client,
            loops,
            awake_interval: DEFAULT_AWAKE_INTERVAL,
            reactive_interval: DEFAULT_REACTIVE_INTERVAL,
            stop_tx,
            handle: Mutex::new(None),
            tick_sender: AgentId::try_new("system".to_string())
                .expect("static agent id is valid"),
            engine: None,
        }
    }

    /// Overrides both cadences (tests, fast deployments)
    #[must_use]
    pub fn with_intervals(mut self, awake: Duration, reactive: Duration) -> Self {
        self.awake_interval = awake;
        self.reactive_interval = reactive;
        self
    }

    /// Also police migration phase timeouts on the fast cadence
    #[must_use]
    pub fn with_migration_engine(mut self, engine: Arc<MigrationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Spawns the ticker task
    pub async fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return;
        }
        let scheduler = self.clone();
        let mut stop_rx = self.stop_tx.subscribe();
        *handle = Some(tokio::spawn(async move {
            let mut awake = tokio::time::interval(scheduler.awake_interval);
            let mut reactive = tokio::time::interval(scheduler.reactive_interval);
            // The first interval tick fires immediately; skip it so boot
            // does not double-tick the fleet.
            awake.tick().await;
            reactive.tick().await;
            loop {
                tokio::select! {
                    _ = awake.tick() => {
                        scheduler.tick_pass(AgentLoopState::Awake).await;
                        if let Some(engine) = &scheduler.engine {
                            let expired = engine.enforce_phase_timeouts().await;
                            if !expired.is_empty() {
                                warn!(count = expired.len(), "migrations timed out in phase");
                            }
                        }
                    }
                    _ = reactive.tick() => {
                        scheduler.tick_pass(AgentLoopState::Reactive).await;
                    }
                    _ = stop_rx.changed() => {
                        info!("work-loop scheduler stopping");
                        break;
                    }
                }
            }
        }));
        info!(
            awake_secs = self.awake_interval.as_secs(),
            reactive_secs = self.reactive_interval.as_secs(),
            "work-loop scheduler started"
        );
    }

    /// Ticks every agent currently in `state`
    async fn tick_pass(&self, state: AgentLoopState) {
        let records = match self.loops.list(Some(state)).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "failed to list loop records");
                return;
            }
        };
        let ticks = records.iter().map(|record| async {
            let meta = FlockMeta::of_type(FlockType::Info);
            match self
                .client
                .send_message(&self.tick_sender, &record.agent_id, "tick", Some(&meta))
                .await
            {
                Ok(_) => {
                    debug!(agent_id = %record.agent_id, "tick delivered");
                    if let Err(e) = self.loops.record_tick(&record.agent_id).await {
                        warn!(agent_id = %record.agent_id, error = %e, "failed to stamp tick");
                    }
                }
                // Retried on the next interval; nothing persisted.
                Err(e) => warn!(agent_id = %record.agent_id, error = %e, "tick failed"),
            }
        });
        futures::future::join_all(ticks).await;
    }

    /// Stops the ticker without interrupting an in-flight pass
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::a2a::server::A2aServer;
    use crate::agent_card::AgentCardRegistry;
    use crate::audit::AuditLog;
    use crate::domain::{AgentCard, AgentRole, FlockAgentMeta};
    use crate::domain_types::NodeId;
    use crate::executor::SessionExecutor;
    use crate::home_manager::HomeManager;
    use crate::migration::engine::MigrationEngine;
    use crate::migration::ticket_store::TicketStore;
    use crate::migration::transport::{MigrationRpcHandler, MigrationTargetService};
    use crate::registry::NodeRegistry;
    use crate::routing::{PeerResolver, RoutingFabric};
    use crate::session::{EchoSession, SessionConfig};
    use crate::storage::MemoryStores;
    use crate::triage::TriageCaptureTable;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    fn node() -> NodeId {
        NodeId::try_new("node-a".to_string()).unwrap()
    }

    fn wired_client(stores: &MemoryStores, agents: &[&str]) -> A2aClient {
        let homes = HomeManager::new(stores.homes(), stores.transitions());
        let audit = AuditLog::new(stores.audit());
        let engine = Arc::new(MigrationEngine::new(
            Arc::new(TicketStore::new()),
            homes.clone(),
            audit.clone(),
            NodeRegistry::new(),
            None,
            node(),
            "http://localhost:7401/flock",
        ));
        let service = Arc::new(MigrationTargetService::new(
            node(),
            std::env::temp_dir().join("flock-sched-tmp"),
            std::env::temp_dir().join("flock-sched-data"),
            homes,
        ));
        let cards = AgentCardRegistry::new();
        let server = Arc::new(A2aServer::new(
            node(),
            "/flock",
            cards.clone(),
            stores.tasks(),
            engine.clone(),
            Arc::new(MigrationRpcHandler::new(service, engine)),
        ));
        for name in agents {
            let id = agent(name);
            server.register_agent(
                id.clone(),
                AgentCard::minimal(&id, "http://localhost:7401/flock"),
                FlockAgentMeta {
                    node_id: node(),
                    role: AgentRole::Worker,
                    archetype: None,
                },
                Arc::new(SessionExecutor::new(
                    id,
                    node(),
                    AgentRole::Worker,
                    Arc::new(EchoSession::new()),
                    SessionConfig::default(),
                    stores.tasks(),
                    AuditLog::new(stores.audit()),
                    TriageCaptureTable::new(),
                )),
            );
        }
        A2aClient::new(
            server,
            RoutingFabric::peer(Arc::new(PeerResolver::new(cards, NodeRegistry::new()))),
        )
    }

    #[tokio::test]
    async fn test_should_tick_awake_agents_and_skip_sleepers_when_running() {
        let stores = MemoryStores::new();
        let client = wired_client(&stores, &["worker-awake", "worker-asleep"]);
        stores
            .agent_loops()
            .init(&agent("worker-awake"), AgentLoopState::Awake)
            .await
            .unwrap();
        stores
            .agent_loops()
            .init(&agent("worker-asleep"), AgentLoopState::Sleep)
            .await
            .unwrap();

        let scheduler = Arc::new(
            WorkLoopScheduler::new(client, stores.agent_loops())
                .with_intervals(Duration::from_millis(30), Duration::from_secs(3600)),
        );
        scheduler.start().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        scheduler.stop().await;

        let awake = stores
            .agent_loops()
            .get(&agent("worker-awake"))
            .await
            .unwrap()
            .unwrap();
        assert!(awake.last_tick_at.is_some(), "awake agent should be ticked");

        let asleep = stores
            .agent_loops()
            .get(&agent("worker-asleep"))
            .await
            .unwrap()
            .unwrap();
        assert!(asleep.last_tick_at.is_none(), "sleeping agent must be skipped");
    }

    #[tokio::test]
    async fn test_should_stop_cleanly_when_stop_is_called_twice() {
        let stores = MemoryStores::new();
        let client = wired_client(&stores, &[]);
        let scheduler = Arc::new(
            WorkLoopScheduler::new(client, stores.agent_loops())
                .with_intervals(Duration::from_millis(50), Duration::from_secs(3600)),
        );
        scheduler.start().await;
        scheduler.stop().await;
        scheduler.stop().await;
    }
}
