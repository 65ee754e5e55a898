//! A2A JSON-RPC server
//!
//! Front-end for one node: per-agent JSON-RPC (`message/send`,
//! `tasks/get`, `tasks/cancel`), the agent-card directory, and a health
//! probe. Methods prefixed `migration/*` are intercepted at server level
//! and never reach a per-agent executor. The frozen guard is consulted
//! before any executor invocation: a mid-migration agent answers with a
//! deterministic error artifact instead of touching the session layer.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    response::Json,
    routing::{get, post},
};
use dashmap::DashMap;
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::a2a::rpc::{Artifact, JsonRpcRequest, JsonRpcResponse, TaskView, codes};
use crate::agent_card::AgentCardRegistry;
use crate::domain::{A2aMessage, AgentCard, FlockAgentMeta, TaskState};
use crate::domain_types::{AgentId, NodeId, TaskId};
use crate::error::{FlockError, Result};
use crate::executor::AgentExecutor;
use crate::migration::engine::MigrationEngine;
use crate::migration::transport::MigrationRpcHandler;
use crate::storage::TaskStore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendParams {
    message: A2aMessage,
    #[serde(default)]
    from: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TaskIdParams {
    id: String,
}

/// The per-node A2A front-end
pub struct A2aServer {
    node_id: NodeId,
    base_path: String,
    cards: AgentCardRegistry,
    executors: DashMap<AgentId, Arc<dyn AgentExecutor>>,
    tasks: Arc<dyn TaskStore>,
    engine: Arc<MigrationEngine>,
    migration_rpc: Arc<MigrationRpcHandler>,
}

impl A2aServer {
    /// Creates a server for one node
    pub fn new(
        node_id: NodeId,
        base_path: impl Into<String>,
        cards: AgentCardRegistry,
        tasks: Arc<dyn TaskStore>,
        engine: Arc<MigrationEngine>,
        migration_rpc: Arc<MigrationRpcHandler>,
    ) -> Self {
        Self {
            node_id,
            base_path: base_path.into(),
            cards,
            executors: DashMap::new(),
            tasks,
            engine,
            migration_rpc,
        }
    }

    /// This node's id
    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// The local card directory
    pub fn cards(&self) -> &AgentCardRegistry {
        &self.cards
    }

    /// Registers a local agent: card, metadata sidecar, and executor
    pub fn register_agent(
        &self,
        agent_id: AgentId,
        card: AgentCard,
        meta: FlockAgentMeta,
        executor: Arc<dyn AgentExecutor>,
    ) {
        self.cards.publish(agent_id.clone(), card, meta);
        self.executors.insert(agent_id, executor);
    }

    /// Unregisters a local agent (teardown or migration away)
    pub fn unregister_agent(&self, agent_id: &AgentId) {
        self.cards.remove(agent_id);
        self.executors.remove(agent_id);
    }

    /// Dispatches one JSON-RPC envelope addressed to `agent_id_raw`.
    ///
    /// Also the in-process entry point for the A2A client's local
    /// dispatch, so local and remote calls share one code path.
    #[instrument(skip(self, request), fields(agent = agent_id_raw, method = %request.method))]
    pub async fn handle_rpc(&self, agent_id_raw: &str, request: JsonRpcRequest) -> JsonRpcResponse {
        if request.jsonrpc != crate::a2a::rpc::JSON_RPC_VERSION {
            return JsonRpcResponse::error(
                request.id,
                codes::INVALID_REQUEST,
                "jsonrpc must be \"2.0\"",
            );
        }

        // Server-level interception: migration methods are node-scoped.
        if request.method.starts_with("migration/") {
            return self.migration_rpc.handle(request).await;
        }

        let id = request.id.clone();
        let Ok(agent_id) = AgentId::try_new(agent_id_raw.to_string()) else {
            return JsonRpcResponse::error(id, codes::INVALID_PARAMS, "invalid agent id");
        };

        match request.method.as_str() {
            "message/send" => match serde_json::from_value::<SendParams>(request.params) {
                Ok(params) => {
                    let from = params
                        .from
                        .and_then(|raw| AgentId::try_new(raw).ok())
                        .unwrap_or_else(|| {
                            AgentId::try_new("external".to_string())
                                .expect("static agent id is valid")
                        });
                    match self.dispatch_send(&agent_id, from, params.message).await {
                        Ok(view) => match serde_json::to_value(&view) {
                            Ok(result) => JsonRpcResponse::ok(id, result),
                            Err(e) => JsonRpcResponse::from_flock_error(id, &e.into()),
                        },
                        Err(e) => JsonRpcResponse::from_flock_error(id, &e),
                    }
                }
                Err(e) => JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid params: {e}"),
                ),
            },
            "tasks/get" => match serde_json::from_value::<TaskIdParams>(request.params) {
                Ok(params) => match self.get_task(&params.id).await {
                    Ok(view) => match serde_json::to_value(&view) {
                        Ok(result) => JsonRpcResponse::ok(id, result),
                        Err(e) => JsonRpcResponse::from_flock_error(id, &e.into()),
                    },
                    Err(e) => JsonRpcResponse::from_flock_error(id, &e),
                },
                Err(e) => JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid params: {e}"),
                ),
            },
            "tasks/cancel" => match serde_json::from_value::<TaskIdParams>(request.params) {
                Ok(params) => match self.cancel_task(&params.id).await {
                    Ok(view) => match serde_json::to_value(&view) {
                        Ok(result) => JsonRpcResponse::ok(id, result),
                        Err(e) => JsonRpcResponse::from_flock_error(id, &e.into()),
                    },
                    Err(e) => JsonRpcResponse::from_flock_error(id, &e),
                },
                Err(e) => JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("invalid params: {e}"),
                ),
            },
            other => JsonRpcResponse::error(
                id,
                codes::METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            ),
        }
    }

    async fn dispatch_send(
        &self,
        agent_id: &AgentId,
        from: AgentId,
        message: A2aMessage,
    ) -> Result<TaskView> {
        let executor = self
            .executors
            .get(agent_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FlockError::not_found("agent", agent_id.as_str()))?;

        // Frozen guard before anything touches the session layer.
        let guard = self.engine.frozen_guard(agent_id).await;
        if guard.rejected {
            let reason = guard
                .reason
                .unwrap_or_else(|| "agent is migrating".to_string());
            let view = TaskView::new(
                TaskId::generate().to_string(),
                uuid::Uuid::new_v4().to_string(),
                TaskState::Rejected,
            )
            .with_artifact(Artifact::text("error", reason.clone()))
            .with_artifact(Artifact::data(
                "frozen",
                serde_json::json!({
                    "rejected": true,
                    "reason": reason,
                    "estimatedDowntimeMs": guard.estimated_downtime_ms,
                }),
            ));
            return Ok(view);
        }

        executor.execute(from, message).await
    }

    async fn get_task(&self, raw_id: &str) -> Result<TaskView> {
        let task_id = TaskId::try_new(raw_id.to_string())
            .map_err(|_| FlockError::validation("id", "invalid task id"))?;
        let record = self
            .tasks
            .get(&task_id)
            .await?
            .ok_or_else(|| FlockError::not_found("task", raw_id))?;
        let mut view = TaskView::new(
            record.task_id.to_string(),
            record.context_id.clone(),
            record.state,
        );
        if let Some(text) = &record.response_text {
            view = view.with_artifact(Artifact::text("response", text.clone()));
        }
        Ok(view)
    }

    async fn cancel_task(&self, raw_id: &str) -> Result<TaskView> {
        let task_id = TaskId::try_new(raw_id.to_string())
            .map_err(|_| FlockError::validation("id", "invalid task id"))?;
        let mut record = self
            .tasks
            .get(&task_id)
            .await?
            .ok_or_else(|| FlockError::not_found("task", raw_id))?;
        if !record.state.is_terminal() {
            record.state = TaskState::Canceled;
            record.updated_at = chrono::Utc::now();
            record.completed_at = Some(record.updated_at);
            self.tasks.update(&record).await?;
        }
        Ok(TaskView::new(
            record.task_id.to_string(),
            record.context_id,
            record.state,
        ))
    }

    fn card_json(agent_id: &AgentId, entry: &crate::agent_card::CardEntry) -> serde_json::Value {
        let mut card = serde_json::to_value(&entry.card).unwrap_or_default();
        if let Some(map) = card.as_object_mut() {
            map.insert("id".to_string(), serde_json::json!(agent_id.to_string()));
            map.insert(
                "flockMeta".to_string(),
                serde_json::to_value(&entry.meta).unwrap_or_default(),
            );
        }
        card
    }

    /// Builds the axum router for this server
    pub fn router(self: &Arc<Self>) -> Router {
        let inner = Router::new()
            .route("/a2a/{agent_id}", post(rpc_handler))
            .route("/a2a/{agent_id}/agent-card.json", get(card_handler))
            .route("/.well-known/agent-card.json", get(directory_handler))
            .route("/health", get(health_handler))
            .with_state(self.clone());
        Router::new().nest(&self.base_path, inner)
    }

    /// Binds and serves until the listener dies
    ///
    /// # Errors
    ///
    /// Returns an error if the bind or the serve loop fails
    pub async fn serve(self: Arc<Self>, addr: SocketAddr) -> Result<()> {
        let router = self.router();
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, base = %self.base_path, "A2A server listening");
        axum::serve(listener, router)
            .await
            .map_err(|e| FlockError::Network {
                message: format!("server error: {e}"),
            })
    }
}

async fn rpc_handler(
    State(server): State<Arc<A2aServer>>,
    Path(agent_id): Path<String>,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    Json(server.handle_rpc(&agent_id, request).await)
}

async fn card_handler(
    State(server): State<Arc<A2aServer>>,
    Path(agent_id): Path<String>,
) -> Json<serde_json::Value> {
    let entry = AgentId::try_new(agent_id)
        .ok()
        .and_then(|id| server.cards.get(&id).map(|entry| (id, entry)));
    match entry {
        Some((id, entry)) => Json(A2aServer::card_json(&id, &entry)),
        None => Json(serde_json::json!({ "error": "agent not found" })),
    }
}

async fn directory_handler(State(server): State<Arc<A2aServer>>) -> Json<serde_json::Value> {
    let agents: Vec<serde_json::Value> = server
        .cards
        .list()
        .iter()
        .map(|(id, entry)| A2aServer::card_json(id, entry))
        .collect();
    Json(serde_json::json!({ "agents": agents }))
}

async fn health_handler(State(server): State<Arc<A2aServer>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "nodeId": server.node_id.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::domain::{AgentRole, MigrationReason};
    use crate::executor::SessionExecutor;
    use crate::home_manager::HomeManager;
    use crate::migration::ticket_store::TicketStore;
    use crate::migration::transport::MigrationTargetService;
    use crate::registry::NodeRegistry;
    use crate::session::{EchoSession, SessionConfig};
    use crate::storage::MemoryStores;
    use crate::triage::TriageCaptureTable;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    fn node(name: &str) -> NodeId {
        NodeId::try_new(name.to_string()).unwrap()
    }

    struct Fixture {
        server: Arc<A2aServer>,
        homes: HomeManager,
        engine: Arc<MigrationEngine>,
    }

    fn fixture() -> Fixture {
        let stores = MemoryStores::new();
        let homes = HomeManager::new(stores.homes(), stores.transitions());
        let audit = AuditLog::new(stores.audit());
        let engine = Arc::new(MigrationEngine::new(
            Arc::new(TicketStore::new()),
            homes.clone(),
            audit.clone(),
            NodeRegistry::new(),
            None,
            node("node-a"),
            "http://localhost:7401/flock",
        ));
        let service = Arc::new(MigrationTargetService::new(
            node("node-a"),
            std::env::temp_dir().join("flock-server-test-tmp"),
            std::env::temp_dir().join("flock-server-test-data"),
            homes.clone(),
        ));
        let migration_rpc = Arc::new(MigrationRpcHandler::new(service, engine.clone()));
        let server = Arc::new(A2aServer::new(
            node("node-a"),
            "/flock",
            AgentCardRegistry::new(),
            stores.tasks(),
            engine.clone(),
            migration_rpc,
        ));

        let worker = agent("worker-1");
        let executor = Arc::new(SessionExecutor::new(
            worker.clone(),
            node("node-a"),
            AgentRole::Worker,
            Arc::new(EchoSession::new()),
            SessionConfig::default(),
            stores.tasks(),
            audit,
            TriageCaptureTable::new(),
        ));
        server.register_agent(
            worker.clone(),
            AgentCard::minimal(&worker, "http://localhost:7401/flock/a2a/worker-1"),
            FlockAgentMeta {
                node_id: node("node-a"),
                role: AgentRole::Worker,
                archetype: None,
            },
            executor,
        );
        Fixture {
            server,
            homes,
            engine,
        }
    }

    fn send_request(text: &str) -> JsonRpcRequest {
        JsonRpcRequest::new(
            "message/send",
            serde_json::json!({
                "message": A2aMessage::build(text, None, None),
                "from": "orchestrator",
            }),
        )
    }

    #[tokio::test]
    async fn test_should_complete_send_when_agent_is_registered() {
        let fixture = fixture();
        let response = fixture.server.handle_rpc("worker-1", send_request("ping")).await;
        let result = response.result.unwrap();
        assert_eq!(result["kind"], "task");
        assert_eq!(result["status"]["state"], "completed");
    }

    #[tokio::test]
    async fn test_should_answer_domain_error_when_agent_is_unknown() {
        let fixture = fixture();
        let response = fixture.server.handle_rpc("ghost", send_request("ping")).await;
        let error = response.error.unwrap();
        assert_eq!(error.code, codes::DOMAIN_ERROR);
        assert!(error.message.contains("not found"));
    }

    #[tokio::test]
    async fn test_should_answer_method_not_found_when_method_is_unknown() {
        let fixture = fixture();
        let response = fixture
            .server
            .handle_rpc(
                "worker-1",
                JsonRpcRequest::new("tasks/does-not-exist", serde_json::json!({})),
            )
            .await;
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_should_reject_with_error_artifact_when_agent_is_frozen() {
        let fixture = fixture();
        // Put worker-1 mid-migration: home active, ticket advanced to FROZEN.
        let home = fixture
            .homes
            .create_home(agent("worker-1"), node("node-a"))
            .await
            .unwrap();
        fixture.homes.activate(&home.home_id, "test").await.unwrap();
        let ticket = fixture
            .engine
            .initiate(
                agent("worker-1"),
                node("node-b"),
                "http://b:7401/flock",
                MigrationReason::AgentRequest,
            )
            .await
            .unwrap();
        for _ in 0..3 {
            fixture.engine.advance_phase(&ticket.migration_id).await.unwrap();
        }

        let response = fixture.server.handle_rpc("worker-1", send_request("ping")).await;
        let result = response.result.unwrap();
        assert_eq!(result["status"]["state"], "rejected");
        let artifacts = result["artifacts"].as_array().unwrap();
        assert!(artifacts.iter().any(|a| a["name"] == "error"));
        assert!(artifacts.iter().any(|a| a["name"] == "frozen"));
    }

    #[tokio::test]
    async fn test_should_serve_task_when_fetching_by_id() {
        let fixture = fixture();
        let response = fixture.server.handle_rpc("worker-1", send_request("ping")).await;
        let task_id = response.result.unwrap()["id"].as_str().unwrap().to_string();

        let fetched = fixture
            .server
            .handle_rpc(
                "worker-1",
                JsonRpcRequest::new("tasks/get", serde_json::json!({ "id": task_id })),
            )
            .await;
        let result = fetched.result.unwrap();
        assert_eq!(result["status"]["state"], "completed");
        assert_eq!(
            result["artifacts"][0]["parts"][0]["text"],
            serde_json::json!("ping")
        );
    }

    #[tokio::test]
    async fn test_should_intercept_migration_methods_when_prefixed() {
        let fixture = fixture();
        // Reaches the migration handler (method exists there), not the
        // per-agent path: "ghost" would otherwise 404.
        let response = fixture
            .server
            .handle_rpc(
                "ghost",
                JsonRpcRequest::new("migration/status", serde_json::json!({})),
            )
            .await;
        // Missing migrationId is an invalid-params domain error, proving
        // the migration handler answered.
        let error = response.error.unwrap();
        assert_eq!(error.code, codes::INVALID_PARAMS);
    }
}
