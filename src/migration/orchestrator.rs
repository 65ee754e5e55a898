//! Migration orchestrator
//!
//! A thin driver that runs one end-to-end migration:
//! `initiate -> advance* -> snapshot -> transfer-and-verify (remote) ->
//! handle_verification -> rehydrate (remote) -> advance -> complete`.
//! Any failure rolls the ticket back and is reported in the outcome
//! rather than propagated.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::{MigrationPhase, MigrationReason};
use crate::domain_types::{AgentId, HomeId, MigrationId, NodeId};
use crate::error::{FlockError, Result};
use crate::migration::engine::MigrationEngine;
use crate::migration::rehydrate::{MigrationPayload, PortableArchive};
use crate::migration::retry::with_retry;
use crate::migration::snapshot::create_snapshot;
use crate::migration::ticket_store::TicketUpdate;
use crate::migration::transport::{
    MigrationRequestParams, MigrationTransport, RehydrateParams, TransferRequest,
};
use crate::registry::NodeRegistry;

/// Builds a transport for a resolved target endpoint
pub type TransportFactory = dyn Fn(&str) -> Arc<dyn MigrationTransport> + Send + Sync;

/// Result of one orchestrated migration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationOutcome {
    /// Whether the agent now lives on the target
    pub success: bool,
    /// Ticket id, when one was created
    pub migration_id: Option<MigrationId>,
    /// Phase the ticket ended in
    pub final_phase: Option<MigrationPhase>,
    /// Terminal error, when the migration failed
    pub error: Option<String>,
    /// Non-fatal problems (skipped projects etc.)
    pub warnings: Vec<String>,
}

/// Drives single migrations end to end
pub struct MigrationOrchestrator {
    engine: Arc<MigrationEngine>,
    registry: NodeRegistry,
    transport_factory: Box<TransportFactory>,
    data_dir: PathBuf,
    tmp_dir: PathBuf,
}

impl MigrationOrchestrator {
    /// Creates an orchestrator for this node
    pub fn new(
        engine: Arc<MigrationEngine>,
        registry: NodeRegistry,
        transport_factory: Box<TransportFactory>,
        data_dir: PathBuf,
        tmp_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            registry,
            transport_factory,
            data_dir,
            tmp_dir,
        }
    }

    fn home_path(&self, agent_id: &AgentId) -> PathBuf {
        self.data_dir.join("agents").join(agent_id.as_str())
    }

    fn work_path(&self, agent_id: &AgentId) -> PathBuf {
        self.data_dir.join("work").join(agent_id.as_str())
    }

    /// Runs one migration end to end.
    ///
    /// Never returns an error: failures roll the ticket back and are
    /// reported in the outcome.
    #[instrument(skip(self), fields(agent_id = %agent_id, target = %target_node_id))]
    pub async fn run(
        &self,
        agent_id: AgentId,
        target_node_id: NodeId,
        reason: MigrationReason,
    ) -> MigrationOutcome {
        let Some(target_entry) = self.registry.get(&target_node_id) else {
            return MigrationOutcome {
                success: false,
                migration_id: None,
                final_phase: None,
                error: Some(format!("target node {target_node_id} is not registered")),
                warnings: Vec::new(),
            };
        };

        let ticket = match self
            .engine
            .initiate(agent_id.clone(), target_node_id, target_entry.a2a_endpoint.as_str(), reason)
            .await
        {
            Ok(ticket) => ticket,
            Err(err) => {
                return MigrationOutcome {
                    success: false,
                    migration_id: None,
                    final_phase: None,
                    error: Some(err.to_string()),
                    warnings: Vec::new(),
                };
            }
        };

        let migration_id = ticket.migration_id.clone();
        let transport = (self.transport_factory)(&target_entry.a2a_endpoint);
        match self
            .drive(&migration_id, &agent_id, reason, transport.as_ref())
            .await
        {
            Ok(warnings) => MigrationOutcome {
                success: true,
                migration_id: Some(migration_id),
                final_phase: Some(MigrationPhase::Completed),
                error: None,
                warnings,
            },
            Err(err) => {
                warn!(migration_id = %migration_id, error = %err, "migration failed, rolling back");
                let final_phase = match self.engine.rollback(&migration_id, &err.to_string()).await {
                    Ok(ticket) => Some(ticket.phase),
                    Err(rollback_err) => {
                        warn!(error = %rollback_err, "rollback itself failed");
                        self.engine
                            .get_status(&migration_id)
                            .await
                            .ok()
                            .map(|t| t.phase)
                    }
                };
                MigrationOutcome {
                    success: false,
                    migration_id: Some(migration_id),
                    final_phase,
                    error: Some(err.to_string()),
                    warnings: Vec::new(),
                }
            }
        }
    }

    async fn drive(
        &self,
        migration_id: &MigrationId,
        agent_id: &AgentId,
        reason: MigrationReason,
        transport: &dyn MigrationTransport,
    ) -> Result<Vec<String>> {
        let ticket = self.engine.get_status(migration_id).await?;

        let ack = with_retry("migration/request", || {
            transport.notify_request(MigrationRequestParams {
                migration_id: migration_id.clone(),
                agent_id: agent_id.clone(),
                source_node_id: ticket.source.node_id.clone(),
                target_node_id: ticket.target.node_id.clone(),
                reason,
            })
        })
        .await?;
        if !ack.accepted {
            return Err(FlockError::PeerRejected {
                code: "REQUEST_REJECTED".to_string(),
                message: ack
                    .error
                    .unwrap_or_else(|| "target refused the migration".to_string()),
            });
        }
        if let Some(reservation_id) = ack.reservation_id {
            self.engine
                .tickets()
                .update(
                    migration_id,
                    TicketUpdate {
                        reservation_id: Some(reservation_id),
                        ..TicketUpdate::default()
                    },
                )
                .await?;
        }

        self.engine.advance_phase(migration_id).await?; // AUTHORIZED
        self.engine.advance_phase(migration_id).await?; // FREEZING (home frozen)
        self.engine.advance_phase(migration_id).await?; // FROZEN
        self.engine.advance_phase(migration_id).await?; // SNAPSHOTTING

        let home_path = self.home_path(agent_id);
        let work_path = self.work_path(agent_id);
        let snapshot = with_retry("snapshot", || {
            create_snapshot(&home_path, migration_id, &self.tmp_dir, Some(work_path.as_path()))
        })
        .await?;

        self.engine.advance_phase(migration_id).await?; // TRANSFERRING (home migrating)

        let archive = tokio::fs::read(&snapshot.archive_path).await?;
        let verification = with_retry("migration/transfer-and-verify", || {
            transport.transfer_and_verify(TransferRequest {
                migration_id: migration_id.clone(),
                archive: archive.clone(),
                checksum: snapshot.checksum.clone(),
                size_bytes: snapshot.size_bytes,
            })
        })
        .await?;

        self.engine.advance_phase(migration_id).await?; // VERIFYING
        self.engine
            .handle_verification(migration_id, &verification)
            .await?;
        if !verification.verified {
            let reason = verification
                .failure_reason
                .map_or_else(|| "verification failed".to_string(), |r| r.to_string());
            return Err(FlockError::VerificationFailed { reason });
        }

        let rehydrated = with_retry("migration/rehydrate", || {
            transport.rehydrate(RehydrateParams {
                migration_id: migration_id.clone(),
                agent_id: agent_id.clone(),
                payload: MigrationPayload {
                    portable: PortableArchive {
                        checksum: snapshot.checksum.clone(),
                        size_bytes: snapshot.size_bytes,
                    },
                    agent_identity: None,
                    work_state: snapshot.work_state.clone(),
                },
                target_home_path: None,
                target_work_dir: None,
            })
        })
        .await?;
        if !rehydrated.success {
            return Err(FlockError::RehydrateFailed {
                message: rehydrated
                    .error
                    .unwrap_or_else(|| "rehydrate failed on target".to_string()),
            });
        }

        self.engine.advance_phase(migration_id).await?; // FINALIZING

        let ticket = self.engine.get_status(migration_id).await?;
        let new_home_id = HomeId::compose(agent_id, &ticket.target.node_id);
        self.engine
            .complete(migration_id, &new_home_id, &ticket.target.endpoint)
            .await?;

        // Clean up the source-side staging directory; the archive has
        // served its purpose.
        let staging = self.tmp_dir.join(migration_id.as_str());
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %e, "failed to purge source staging dir");
            }
        }

        info!(migration_id = %migration_id, "migration run finished");
        Ok(rehydrated.warnings)
    }
}
