//! Migration transports and the `migration/*` JSON-RPC surface
//!
//! The orchestrator drives the target side through the
//! [`MigrationTransport`] abstraction. Two conforming transports exist:
//! an in-process transport that calls the target node's
//! [`MigrationTargetService`] directly (tests, co-located nodes) and an
//! HTTP transport that wraps each call in a `migration/*` JSON-RPC method.
//! Archives cross the wire base64-encoded and are staged under
//! `<tmp_dir>/<migration_id>/<migration_id>.tar.gz` before verification.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::a2a::rpc::{JsonRpcRequest, JsonRpcResponse, codes};
use crate::domain::{MigrationReason, VerificationFailureReason, VerificationResult};
use crate::domain_types::{AgentId, MigrationId, NodeId};
use crate::error::{FlockError, Result};
use crate::home_manager::HomeManager;
use crate::migration::engine::MigrationEngine;
use crate::migration::orchestrator::MigrationOrchestrator;
use crate::migration::rehydrate::{MigrationPayload, RehydrateResult, rehydrate};
use crate::migration::snapshot::verify_snapshot;

/// Capacity hook consulted by `migration/request`; absence means
/// "always ok"
pub type CapacityCheck = dyn Fn(&MigrationRequestParams) -> bool + Send + Sync;

/// Parameters of `migration/request`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequestParams {
    /// Ticket id on the source
    pub migration_id: MigrationId,
    /// Agent being moved
    pub agent_id: AgentId,
    /// Requesting node
    pub source_node_id: NodeId,
    /// This node
    pub target_node_id: NodeId,
    /// Why the migration started
    pub reason: MigrationReason,
}

/// Acknowledgement of `migration/request`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestAck {
    /// Whether the target will accept the transfer
    pub accepted: bool,
    /// Target-side reservation handle when accepted
    pub reservation_id: Option<String>,
    /// Rejection detail when not
    pub error: Option<String>,
}

/// One archive transfer (in-process form carries raw bytes)
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Ticket id
    pub migration_id: MigrationId,
    /// Raw archive bytes
    pub archive: Vec<u8>,
    /// Expected hex SHA-256
    pub checksum: String,
    /// Expected size
    pub size_bytes: u64,
}

/// Wire form of a transfer: archive as base64
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferWire {
    migration_id: MigrationId,
    archive: String,
    checksum: String,
    size_bytes: u64,
}

/// Parameters of `migration/rehydrate`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RehydrateParams {
    /// Ticket id (locates the staged archive)
    pub migration_id: MigrationId,
    /// Agent being rebuilt
    pub agent_id: AgentId,
    /// Payload to rebuild from
    pub payload: MigrationPayload,
    /// Override for the home path (defaults to the node's layout)
    pub target_home_path: Option<String>,
    /// Override for the work dir (defaults to the node's layout)
    pub target_work_dir: Option<String>,
}

/// Remote-dispatch abstraction the orchestrator drives
#[async_trait]
pub trait MigrationTransport: Send + Sync {
    /// Asks the target to accept an inbound migration
    async fn notify_request(&self, params: MigrationRequestParams) -> Result<RequestAck>;

    /// Ships the archive and has the target verify it
    async fn transfer_and_verify(&self, request: TransferRequest) -> Result<VerificationResult>;

    /// Has the target rebuild the agent from the staged archive
    async fn rehydrate(&self, params: RehydrateParams) -> Result<RehydrateResult>;
}

/// Target-side migration logic shared by both transports
pub struct MigrationTargetService {
    node_id: NodeId,
    tmp_dir: PathBuf,
    data_dir: PathBuf,
    homes: HomeManager,
    known_peers: Option<HashSet<NodeId>>,
    capacity_check: Option<Box<CapacityCheck>>,
    // agent -> reservation for in-flight inbound migrations
    reservations: DashMap<AgentId, String>,
}

impl MigrationTargetService {
    /// Creates the service for this node
    pub fn new(node_id: NodeId, tmp_dir: PathBuf, data_dir: PathBuf, homes: HomeManager) -> Self {
        Self {
            node_id,
            tmp_dir,
            data_dir,
            homes,
            known_peers: None,
            capacity_check: None,
            reservations: DashMap::new(),
        }
    }

    /// Restricts `migration/request` to a known-peer set
    #[must_use]
    pub fn with_known_peers(mut self, peers: HashSet<NodeId>) -> Self {
        self.known_peers = Some(peers);
        self
    }

    /// Installs a capacity hook
    #[must_use]
    pub fn with_capacity_check(mut self, check: Box<CapacityCheck>) -> Self {
        self.capacity_check = Some(check);
        self
    }

    fn staged_archive_path(&self, migration_id: &MigrationId) -> PathBuf {
        self.tmp_dir
            .join(migration_id.as_str())
            .join(format!("{migration_id}.tar.gz"))
    }

    /// Default home path for an inbound agent
    pub fn home_path_for(&self, agent_id: &AgentId) -> PathBuf {
        self.data_dir.join("agents").join(agent_id.as_str())
    }

    /// Default work root for an inbound agent
    pub fn work_path_for(&self, agent_id: &AgentId) -> PathBuf {
        self.data_dir.join("work").join(agent_id.as_str())
    }

    /// Known-peer check, capacity check, duplicate-agent check.
    ///
    /// # Errors
    ///
    /// `PeerRejected { UNKNOWN_SOURCE }` for a source outside the
    /// configured peer set; `DuplicateMigration` when the agent already
    /// has an inbound reservation; `PeerRejected { NO_CAPACITY }` when the
    /// capacity hook refuses.
    #[instrument(skip(self), fields(agent_id = %params.agent_id, source = %params.source_node_id))]
    pub async fn handle_request(&self, params: &MigrationRequestParams) -> Result<RequestAck> {
        if let Some(known) = &self.known_peers {
            if !known.contains(&params.source_node_id) {
                return Err(FlockError::PeerRejected {
                    code: "UNKNOWN_SOURCE".to_string(),
                    message: format!("source node {} is not a known peer", params.source_node_id),
                });
            }
        }
        if self.reservations.contains_key(&params.agent_id) {
            return Err(FlockError::DuplicateMigration {
                agent_id: params.agent_id.clone(),
                migration_id: params.migration_id.to_string(),
            });
        }
        if let Some(check) = &self.capacity_check {
            if !check(params) {
                return Err(FlockError::PeerRejected {
                    code: "NO_CAPACITY".to_string(),
                    message: format!("node {} cannot take {}", self.node_id, params.agent_id),
                });
            }
        }

        let reservation_id = Uuid::new_v4().to_string();
        self.reservations
            .insert(params.agent_id.clone(), reservation_id.clone());
        info!(reservation_id = %reservation_id, "inbound migration accepted");
        Ok(RequestAck {
            accepted: true,
            reservation_id: Some(reservation_id),
            error: None,
        })
    }

    /// Stages the archive bytes, then verifies digest and structure.
    ///
    /// A short write (`ENOSPC`) reports `DISK_FULL` rather than erroring.
    #[instrument(skip(self, request), fields(migration_id = %request.migration_id, size = request.archive.len()))]
    pub async fn handle_transfer_and_verify(
        &self,
        request: &TransferRequest,
    ) -> VerificationResult {
        let archive_path = self.staged_archive_path(&request.migration_id);
        if let Some(parent) = archive_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "failed to create staging dir");
                return VerificationResult::fail(VerificationFailureReason::DiskFull, None);
            }
        }
        if let Err(e) = tokio::fs::write(&archive_path, &request.archive).await {
            let reason = if e.kind() == std::io::ErrorKind::StorageFull {
                VerificationFailureReason::DiskFull
            } else {
                VerificationFailureReason::ArchiveCorrupt
            };
            warn!(error = %e, "failed to stage archive");
            return VerificationResult::fail(reason, None);
        }
        verify_snapshot(&archive_path, &request.checksum, Some(request.size_bytes)).await
    }

    /// Re-verifies an already-staged archive
    pub async fn handle_verify(
        &self,
        migration_id: &MigrationId,
        checksum: &str,
        size_bytes: Option<u64>,
    ) -> VerificationResult {
        verify_snapshot(&self.staged_archive_path(migration_id), checksum, size_bytes).await
    }

    /// Rebuilds the agent from the staged archive and records its home.
    ///
    /// The staging directory is purged after rehydration, success or not.
    #[instrument(skip(self, params), fields(migration_id = %params.migration_id, agent_id = %params.agent_id))]
    pub async fn handle_rehydrate(&self, params: &RehydrateParams) -> RehydrateResult {
        let archive_path = self.staged_archive_path(&params.migration_id);
        let target_home = params
            .target_home_path
            .as_ref()
            .map_or_else(|| self.home_path_for(&params.agent_id), PathBuf::from);
        let target_work = params
            .target_work_dir
            .as_ref()
            .map_or_else(|| self.work_path_for(&params.agent_id), PathBuf::from);

        let result = rehydrate(&archive_path, &params.payload, &target_home, &target_work).await;

        if result.success {
            // Record the new home; an existing record (re-migration to a
            // prior host) is reactivated instead.
            let created = self
                .homes
                .create_home(params.agent_id.clone(), self.node_id.clone())
                .await;
            let home_id = match created {
                Ok(home) => Some(home.home_id),
                Err(FlockError::Validation { .. }) => Some(crate::domain_types::HomeId::compose(
                    &params.agent_id,
                    &self.node_id,
                )),
                Err(e) => {
                    warn!(error = %e, "failed to record target home");
                    None
                }
            };
            if let Some(home_id) = home_id {
                if let Err(e) = self.homes.activate(&home_id, params.migration_id.as_str()).await {
                    warn!(error = %e, "failed to activate target home");
                }
            }
        }

        let staging = self.tmp_dir.join(params.migration_id.as_str());
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to purge staging dir");
            }
        }
        result
    }

    /// Releases the agent's inbound reservation (completion or abort)
    pub fn release_reservation(&self, agent_id: &AgentId) {
        self.reservations.remove(agent_id);
    }
}

/// Transport for tests and co-located nodes: calls the target service
/// directly
pub struct InProcessTransport {
    target: Arc<MigrationTargetService>,
}

impl InProcessTransport {
    /// Wraps a target service
    pub fn new(target: Arc<MigrationTargetService>) -> Self {
        Self { target }
    }
}

#[async_trait]
impl MigrationTransport for InProcessTransport {
    async fn notify_request(&self, params: MigrationRequestParams) -> Result<RequestAck> {
        self.target.handle_request(&params).await
    }

    async fn transfer_and_verify(&self, request: TransferRequest) -> Result<VerificationResult> {
        Ok(self.target.handle_transfer_and_verify(&request).await)
    }

    async fn rehydrate(&self, params: RehydrateParams) -> Result<RehydrateResult> {
        let result = self.target.handle_rehydrate(&params).await;
        self.target.release_reservation(&params.agent_id);
        Ok(result)
    }
}

/// Production transport: wraps each call in a `migration/*` JSON-RPC POST
pub struct HttpMigrationTransport {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpMigrationTransport {
    /// Creates a transport against a node's base A2A endpoint
    /// (e.g. `http://host:7401/flock`)
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        // migration/* methods are intercepted at server level; the agent
        // path segment is irrelevant.
        let url = format!("{}/a2a/_migration", self.endpoint);
        let request = JsonRpcRequest::new(method, params);
        let response: JsonRpcResponse = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        if let Some(error) = response.error {
            let code = error
                .data
                .as_ref()
                .and_then(|data| data.get("code"))
                .and_then(|code| code.as_str())
                .unwrap_or("PEER_ERROR")
                .to_string();
            return Err(FlockError::PeerRejected {
                code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| FlockError::internal("peer returned neither result nor error"))
    }
}

#[async_trait]
impl MigrationTransport for HttpMigrationTransport {
    async fn notify_request(&self, params: MigrationRequestParams) -> Result<RequestAck> {
        let result = self
            .call("migration/request", serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn transfer_and_verify(&self, request: TransferRequest) -> Result<VerificationResult> {
        let wire = TransferWire {
            migration_id: request.migration_id,
            archive: BASE64.encode(&request.archive),
            checksum: request.checksum,
            size_bytes: request.size_bytes,
        };
        let result = self
            .call("migration/transfer-and-verify", serde_json::to_value(&wire)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn rehydrate(&self, params: RehydrateParams) -> Result<RehydrateResult> {
        let result = self
            .call("migration/rehydrate", serde_json::to_value(&params)?)
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Parameters of `migration/run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    /// Agent to move
    pub agent_id: AgentId,
    /// Destination node
    pub target_node_id: NodeId,
    /// Why
    pub reason: MigrationReason,
}

/// Server-level dispatcher for `migration/*` JSON-RPC methods
pub struct MigrationRpcHandler {
    service: Arc<MigrationTargetService>,
    engine: Arc<MigrationEngine>,
    orchestrator: OnceLock<Arc<MigrationOrchestrator>>,
}

impl MigrationRpcHandler {
    /// Creates the dispatcher
    pub fn new(service: Arc<MigrationTargetService>, engine: Arc<MigrationEngine>) -> Self {
        Self {
            service,
            engine,
            orchestrator: OnceLock::new(),
        }
    }

    /// Installs the orchestrator serving `migration/run` (wired at boot,
    /// after the transports exist)
    pub fn set_orchestrator(&self, orchestrator: Arc<MigrationOrchestrator>) {
        let _ = self.orchestrator.set(orchestrator);
    }

    /// The target-side service (test and boot aid)
    pub fn service(&self) -> Arc<MigrationTargetService> {
        self.service.clone()
    }

    fn parse<T: serde::de::DeserializeOwned>(
        params: &serde_json::Value,
    ) -> std::result::Result<T, JsonRpcResponse> {
        serde_json::from_value(params.clone()).map_err(|e| {
            JsonRpcResponse::error(
                serde_json::Value::Null,
                codes::INVALID_PARAMS,
                format!("invalid params: {e}"),
            )
        })
    }

    /// Dispatches one `migration/*` request
    pub async fn handle(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome: std::result::Result<serde_json::Value, FlockError> = match request
            .method
            .as_str()
        {
            "migration/request" => match Self::parse::<MigrationRequestParams>(&request.params) {
                Ok(params) => self
                    .service
                    .handle_request(&params)
                    .await
                    .and_then(|ack| Ok(serde_json::to_value(ack)?)),
                Err(response) => return JsonRpcResponse { id, ..response },
            },
            "migration/approve" | "migration/reject" => {
                // Cooperative acks; the reservation table is authoritative.
                let approved = request.method.ends_with("approve");
                if !approved {
                    if let Some(agent) = request
                        .params
                        .get("agentId")
                        .and_then(|v| v.as_str())
                        .and_then(|raw| AgentId::try_new(raw.to_string()).ok())
                    {
                        self.service.release_reservation(&agent);
                    }
                }
                Ok(serde_json::json!({ "approved": approved }))
            }
            "migration/transfer" | "migration/transfer-and-verify" => {
                match Self::parse::<TransferWire>(&request.params) {
                    Ok(wire) => match BASE64.decode(&wire.archive) {
                        Ok(archive) => {
                            let transfer = TransferRequest {
                                migration_id: wire.migration_id,
                                archive,
                                checksum: wire.checksum,
                                size_bytes: wire.size_bytes,
                            };
                            let result = self.service.handle_transfer_and_verify(&transfer).await;
                            serde_json::to_value(result).map_err(Into::into)
                        }
                        Err(e) => Err(FlockError::validation("archive", format!("bad base64: {e}"))),
                    },
                    Err(response) => return JsonRpcResponse { id, ..response },
                }
            }
            "migration/verify" => {
                let migration_id = request
                    .params
                    .get("migrationId")
                    .and_then(|v| v.as_str())
                    .and_then(|raw| MigrationId::try_new(raw.to_string()).ok());
                let checksum = request
                    .params
                    .get("checksum")
                    .and_then(|v| v.as_str())
                    .map(ToString::to_string);
                match (migration_id, checksum) {
                    (Some(migration_id), Some(checksum)) => {
                        let result = self.service.handle_verify(&migration_id, &checksum, None).await;
                        serde_json::to_value(result).map_err(Into::into)
                    }
                    _ => Err(FlockError::validation(
                        "params",
                        "migrationId and checksum are required",
                    )),
                }
            }
            "migration/rehydrate" => match Self::parse::<RehydrateParams>(&request.params) {
                Ok(params) => {
                    let result = self.service.handle_rehydrate(&params).await;
                    self.service.release_reservation(&params.agent_id);
                    serde_json::to_value(result).map_err(Into::into)
                }
                Err(response) => return JsonRpcResponse { id, ..response },
            },
            "migration/complete" => {
                if let Some(agent) = request
                    .params
                    .get("agentId")
                    .and_then(|v| v.as_str())
                    .and_then(|raw| AgentId::try_new(raw.to_string()).ok())
                {
                    self.service.release_reservation(&agent);
                }
                Ok(serde_json::json!({ "ok": true }))
            }
            "migration/status" => {
                let migration_id = request
                    .params
                    .get("migrationId")
                    .and_then(|v| v.as_str())
                    .and_then(|raw| MigrationId::try_new(raw.to_string()).ok());
                match migration_id {
                    Some(migration_id) => self
                        .engine
                        .get_status(&migration_id)
                        .await
                        .and_then(|ticket| Ok(serde_json::to_value(ticket)?)),
                    None => Err(FlockError::validation("migrationId", "required")),
                }
            }
            "migration/abort" => {
                let migration_id = request
                    .params
                    .get("migrationId")
                    .and_then(|v| v.as_str())
                    .and_then(|raw| MigrationId::try_new(raw.to_string()).ok());
                let reason = request
                    .params
                    .get("reason")
                    .and_then(|v| v.as_str())
                    .unwrap_or("aborted by peer");
                match migration_id {
                    Some(migration_id) => self
                        .engine
                        .rollback(&migration_id, reason)
                        .await
                        .and_then(|ticket| Ok(serde_json::to_value(ticket)?)),
                    None => Err(FlockError::validation("migrationId", "required")),
                }
            }
            "migration/run" => match Self::parse::<RunParams>(&request.params) {
                Ok(params) => match self.orchestrator.get() {
                    Some(orchestrator) => {
                        let outcome = orchestrator
                            .run(params.agent_id, params.target_node_id, params.reason)
                            .await;
                        serde_json::to_value(outcome).map_err(Into::into)
                    }
                    None => Err(FlockError::internal("no migration orchestrator configured")),
                },
                Err(response) => return JsonRpcResponse { id, ..response },
            },
            other => {
                return JsonRpcResponse::error(
                    id,
                    codes::METHOD_NOT_FOUND,
                    format!("unknown method: {other}"),
                );
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::ok(id, result),
            Err(err) => JsonRpcResponse::from_flock_error(id, &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStores;
    use tempfile::tempdir;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    fn node(name: &str) -> NodeId {
        NodeId::try_new(name.to_string()).unwrap()
    }

    fn service(tmp: &std::path::Path, data: &std::path::Path) -> MigrationTargetService {
        let stores = MemoryStores::new();
        MigrationTargetService::new(
            node("target-node"),
            tmp.to_path_buf(),
            data.to_path_buf(),
            HomeManager::new(stores.homes(), stores.transitions()),
        )
    }

    fn request_params(agent_name: &str) -> MigrationRequestParams {
        MigrationRequestParams {
            migration_id: MigrationId::generate(),
            agent_id: agent(agent_name),
            source_node_id: node("source-node"),
            target_node_id: node("target-node"),
            reason: MigrationReason::AgentRequest,
        }
    }

    #[tokio::test]
    async fn test_should_accept_request_when_no_checks_are_configured() {
        let tmp = tempdir().unwrap();
        let data = tempdir().unwrap();
        let service = service(tmp.path(), data.path());
        let ack = service.handle_request(&request_params("worker-1")).await.unwrap();
        assert!(ack.accepted);
        assert!(ack.reservation_id.is_some());
    }

    #[tokio::test]
    async fn test_should_reject_unknown_source_when_peer_set_is_configured() {
        let tmp = tempdir().unwrap();
        let data = tempdir().unwrap();
        let service = service(tmp.path(), data.path())
            .with_known_peers(HashSet::from([node("trusted-node")]));
        let err = service
            .handle_request(&request_params("worker-1"))
            .await
            .unwrap_err();
        match err {
            FlockError::PeerRejected { code, .. } => assert_eq!(code, "UNKNOWN_SOURCE"),
            other => panic!("expected PeerRejected, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_agent_when_reservation_exists() {
        let tmp = tempdir().unwrap();
        let data = tempdir().unwrap();
        let service = service(tmp.path(), data.path());
        service.handle_request(&request_params("worker-1")).await.unwrap();
        let err = service
            .handle_request(&request_params("worker-1"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already has an active migration"));
    }

    #[tokio::test]
    async fn test_should_honor_capacity_hook_when_it_refuses() {
        let tmp = tempdir().unwrap();
        let data = tempdir().unwrap();
        let service = service(tmp.path(), data.path()).with_capacity_check(Box::new(|_| false));
        let err = service
            .handle_request(&request_params("worker-1"))
            .await
            .unwrap_err();
        match err {
            FlockError::PeerRejected { code, .. } => assert_eq!(code, "NO_CAPACITY"),
            other => panic!("expected PeerRejected, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_should_stage_and_verify_when_transfer_bytes_match() {
        let tmp = tempdir().unwrap();
        let data = tempdir().unwrap();
        let home = tempdir().unwrap();
        tokio::fs::write(home.path().join("SOUL.md"), "# soul\n").await.unwrap();
        let migration_id = MigrationId::generate();
        let snapshot = crate::migration::snapshot::create_snapshot(
            home.path(),
            &migration_id,
            tmp.path().join("source").as_path(),
            None,
        )
        .await
        .unwrap();
        let archive = tokio::fs::read(&snapshot.archive_path).await.unwrap();

        let service = service(tmp.path(), data.path());
        let result = service
            .handle_transfer_and_verify(&TransferRequest {
                migration_id: migration_id.clone(),
                archive,
                checksum: snapshot.checksum.clone(),
                size_bytes: snapshot.size_bytes,
            })
            .await;
        assert!(result.verified);
        // The archive is staged at the documented path.
        assert!(
            tmp.path()
                .join(migration_id.as_str())
                .join(format!("{migration_id}.tar.gz"))
                .exists()
        );
    }

    #[tokio::test]
    async fn test_should_answer_method_not_found_when_migration_method_is_unknown() {
        let tmp = tempdir().unwrap();
        let data = tempdir().unwrap();
        let stores = MemoryStores::new();
        let homes = HomeManager::new(stores.homes(), stores.transitions());
        let engine = Arc::new(MigrationEngine::new(
            Arc::new(crate::migration::ticket_store::TicketStore::new()),
            homes.clone(),
            crate::audit::AuditLog::new(stores.audit()),
            crate::registry::NodeRegistry::new(),
            None,
            node("target-node"),
            "http://target:7401/flock",
        ));
        let handler = MigrationRpcHandler::new(Arc::new(service(tmp.path(), data.path())), engine);
        let response = handler
            .handle(JsonRpcRequest::new("migration/does-not-exist", serde_json::json!({})))
            .await;
        assert_eq!(response.error.unwrap().code, codes::METHOD_NOT_FOUND);
    }
}
