//! Migration engine: phase driver, frozen guard, completion hook
//!
//! The engine owns every ticket mutation. Phase advances perform the side
//! effect of the phase they enter (freeze transitions the home to FROZEN,
//! transfer to MIGRATING, completion retires the source home), and the
//! `VERIFYING -> REHYDRATING` edge flips ownership to the target in the
//! same store write as the phase update.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::audit::AuditLog;
use crate::domain::{
    AuditEntry, AuditLevel, HomeState, MigrationEndpoint, MigrationPhase, MigrationReason,
    MigrationTicket, OwnershipHolder, VerificationResult,
};
use crate::domain_types::{AgentId, HomeId, MigrationId, NodeId};
use crate::error::{FlockError, Result};
use crate::home_manager::HomeManager;
use crate::migration::ticket_store::{TicketFilter, TicketStore, TicketUpdate};
use crate::registry::{AssignmentStore, NodeRegistry};

/// Frozen-guard verdict for one agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrozenGuardDecision {
    /// Whether inbound messages must be rejected
    pub rejected: bool,
    /// Why, when rejected
    pub reason: Option<String>,
    /// Phase-dependent downtime estimate, when rejected
    pub estimated_downtime_ms: Option<u64>,
}

impl FrozenGuardDecision {
    /// The all-clear verdict
    pub fn clear() -> Self {
        Self {
            rejected: false,
            reason: None,
            estimated_downtime_ms: None,
        }
    }
}

fn phase_audit_action(phase: MigrationPhase) -> &'static str {
    match phase {
        MigrationPhase::Requested => "migration.initiated",
        MigrationPhase::Authorized => "migration.authorized",
        MigrationPhase::Freezing => "migration.freezing",
        MigrationPhase::Frozen => "migration.frozen",
        MigrationPhase::Snapshotting => "migration.snapshotted",
        MigrationPhase::Transferring => "migration.transferred",
        MigrationPhase::Verifying => "migration.verified",
        MigrationPhase::Rehydrating => "migration.rehydrated",
        MigrationPhase::Finalizing => "migration.finalized",
        MigrationPhase::Completed => "migration.completed",
        MigrationPhase::RollingBack => "migration.rolling-back",
        MigrationPhase::Aborted => "migration.aborted",
        MigrationPhase::Failed => "migration.failed",
    }
}

/// Drives migration tickets through their FSM
pub struct MigrationEngine {
    tickets: Arc<TicketStore>,
    homes: HomeManager,
    audit: AuditLog,
    registry: NodeRegistry,
    assignments: Option<AssignmentStore>,
    node_id: NodeId,
    local_endpoint: String,
}

impl MigrationEngine {
    /// Creates an engine for this node
    pub fn new(
        tickets: Arc<TicketStore>,
        homes: HomeManager,
        audit: AuditLog,
        registry: NodeRegistry,
        assignments: Option<AssignmentStore>,
        node_id: NodeId,
        local_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            tickets,
            homes,
            audit,
            registry,
            assignments,
            node_id,
            local_endpoint: local_endpoint.into(),
        }
    }

    /// The ticket store (shared with the A2A server's frozen guard)
    pub fn tickets(&self) -> Arc<TicketStore> {
        self.tickets.clone()
    }

    /// The node registry this engine updates on completion
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Starts a migration for an agent hosted on this node.
    ///
    /// # Errors
    ///
    /// `NotFound` when the agent has no home here; `DuplicateMigration`
    /// when a non-terminal ticket already exists.
    #[instrument(skip(self), fields(agent_id = %agent_id, target = %target_node_id))]
    pub async fn initiate(
        &self,
        agent_id: AgentId,
        target_node_id: NodeId,
        target_endpoint: &str,
        reason: MigrationReason,
    ) -> Result<MigrationTicket> {
        let source_home_id = HomeId::compose(&agent_id, &self.node_id);
        // The home must exist before anything moves.
        let _home = self.homes.get(&source_home_id).await?;

        let ticket = MigrationTicket::new(
            agent_id.clone(),
            MigrationEndpoint {
                node_id: self.node_id.clone(),
                home_id: source_home_id,
                endpoint: self.local_endpoint.clone(),
            },
            MigrationEndpoint {
                home_id: HomeId::compose(&agent_id, &target_node_id),
                node_id: target_node_id,
                endpoint: target_endpoint.to_string(),
            },
            reason,
        );
        let ticket = self.tickets.create(ticket).await?;
        info!(migration_id = %ticket.migration_id, "migration initiated");
        Ok(ticket)
    }

    /// Moves the ticket to the next canonical phase, performing that
    /// phase's side effect.
    ///
    /// `FINALIZING -> COMPLETED` goes through [`Self::complete`] (it needs
    /// the new home id and endpoint); `VERIFYING -> REHYDRATING` through
    /// [`Self::handle_verification`].
    ///
    /// # Errors
    ///
    /// `InvalidPhaseTransition` at the end of the canonical chain and for
    /// terminal tickets; home FSM errors surface unchanged.
    #[instrument(skip(self))]
    pub async fn advance_phase(&self, migration_id: &MigrationId) -> Result<MigrationTicket> {
        let ticket = self
            .tickets
            .get(migration_id)
            .await
            .ok_or_else(|| FlockError::not_found("migration", migration_id.as_str()))?;

        let next = ticket.phase.next_canonical().ok_or_else(|| {
            FlockError::InvalidPhaseTransition {
                from: ticket.phase.to_string(),
                to: "<next>".to_string(),
            }
        })?;
        if next == MigrationPhase::Completed {
            return Err(FlockError::validation(
                "phase",
                "FINALIZING -> COMPLETED requires complete() with the new home id",
            ));
        }

        // Side effects happen before the ticket write so a failed home
        // transition leaves the ticket phase untouched.
        match next {
            MigrationPhase::Freezing => {
                self.homes
                    .transition(
                        &ticket.source.home_id,
                        HomeState::Frozen,
                        "migration freeze",
                        migration_id.as_str(),
                    )
                    .await?;
            }
            MigrationPhase::Transferring => {
                self.homes
                    .transition(
                        &ticket.source.home_id,
                        HomeState::Migrating,
                        "migration transfer",
                        migration_id.as_str(),
                    )
                    .await?;
            }
            _ => {}
        }

        let updates = if next == MigrationPhase::Rehydrating {
            TicketUpdate {
                ownership_holder: Some(OwnershipHolder::Target),
                ..TicketUpdate::default()
            }
        } else {
            TicketUpdate::default()
        };
        self.tickets.update_phase(migration_id, next, updates).await
    }

    /// Applies a target-side verification result.
    ///
    /// `verified` advances to REHYDRATING and flips ownership to the
    /// target atomically; a failure advances to ROLLING_BACK with the
    /// reason recorded (a subsequent [`Self::rollback`] restores the
    /// source home).
    #[instrument(skip(self, result))]
    pub async fn handle_verification(
        &self,
        migration_id: &MigrationId,
        result: &VerificationResult,
    ) -> Result<MigrationTicket> {
        if result.verified {
            self.tickets
                .update_phase(
                    migration_id,
                    MigrationPhase::Rehydrating,
                    TicketUpdate {
                        ownership_holder: Some(OwnershipHolder::Target),
                        ..TicketUpdate::default()
                    },
                )
                .await
        } else {
            let reason = result
                .failure_reason
                .map_or_else(|| "verification failed".to_string(), |r| r.to_string());
            warn!(migration_id = %migration_id, reason = %reason, "verification failed");
            self.tickets
                .update_phase(
                    migration_id,
                    MigrationPhase::RollingBack,
                    TicketUpdate {
                        error: Some(reason),
                        ..TicketUpdate::default()
                    },
                )
                .await
        }
    }

    /// Finishes a migration: COMPLETED phase, registry and assignment
    /// hooks, source home retirement, and one audit entry per phase
    /// entered.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        migration_id: &MigrationId,
        new_home_id: &HomeId,
        new_endpoint: &str,
    ) -> Result<MigrationTicket> {
        let ticket = self
            .tickets
            .update_phase(migration_id, MigrationPhase::Completed, TicketUpdate::default())
            .await?;

        // Registry: the agent now lives on the target node. add_agent
        // registers the target node (online, ticket endpoint) if the
        // registry has never seen it.
        self.registry
            .remove_agent(&ticket.source.node_id, &ticket.agent_id);
        self.registry
            .add_agent(&ticket.target.node_id, new_endpoint, &ticket.agent_id);

        // Central topology: re-route future sysadmin traffic.
        if let Some(assignments) = &self.assignments {
            if let Err(e) = assignments.reassign(&ticket.agent_id, ticket.target.node_id.clone()) {
                warn!(agent_id = %ticket.agent_id, error = %e, "no assignment to update on completion");
            }
        }

        self.homes
            .transition(
                &ticket.source.home_id,
                HomeState::Retired,
                "migration completed",
                migration_id.as_str(),
            )
            .await?;

        for phase in MigrationPhase::CANONICAL_ORDER {
            if let Some(entered_at) = ticket.phase_entered_at(phase) {
                self.audit
                    .append(
                        AuditEntry::new(
                            ticket.agent_id.clone(),
                            phase_audit_action(phase),
                            AuditLevel::Green,
                        )
                        .with_home(ticket.source.home_id.clone())
                        .with_detail(format!(
                            "{} -> {} ({} at {})",
                            ticket.source.node_id, ticket.target.node_id, new_home_id, entered_at
                        ))
                        .with_result("completed"),
                    )
                    .await?;
            }
        }

        info!(migration_id = %migration_id, "migration completed");
        Ok(ticket)
    }

    /// Unwinds a migration toward ABORTED, restoring the source home to
    /// LEASED when a freeze occurred.
    ///
    /// Tickets too early to roll back (before FROZEN) go straight to
    /// FAILED; a failed home restore also lands in FAILED.
    #[instrument(skip(self))]
    pub async fn rollback(
        &self,
        migration_id: &MigrationId,
        reason: &str,
    ) -> Result<MigrationTicket> {
        let ticket = self
            .tickets
            .get(migration_id)
            .await
            .ok_or_else(|| FlockError::not_found("migration", migration_id.as_str()))?;

        if ticket.phase.is_terminal() {
            return Ok(ticket);
        }

        let ticket = if ticket.phase == MigrationPhase::RollingBack {
            ticket
        } else if ticket.phase.can_transition_to(MigrationPhase::RollingBack) {
            self.tickets
                .update_phase(
                    migration_id,
                    MigrationPhase::RollingBack,
                    TicketUpdate {
                        error: Some(reason.to_string()),
                        ..TicketUpdate::default()
                    },
                )
                .await?
        } else {
            // Nothing frozen yet; fail in place.
            let failed = self
                .tickets
                .update_phase(
                    migration_id,
                    MigrationPhase::Failed,
                    TicketUpdate {
                        error: Some(reason.to_string()),
                        ..TicketUpdate::default()
                    },
                )
                .await?;
            self.append_rollback_audit(&failed, reason).await?;
            return Ok(failed);
        };

        let mut restore_failed = None;
        if ticket.freeze_occurred() {
            let home = self.homes.get(&ticket.source.home_id).await?;
            if matches!(home.state, HomeState::Frozen | HomeState::Migrating) {
                if let Err(e) = self
                    .homes
                    .transition(
                        &ticket.source.home_id,
                        HomeState::Leased,
                        "migration rollback",
                        migration_id.as_str(),
                    )
                    .await
                {
                    restore_failed = Some(e.to_string());
                }
            }
        }

        let terminal = if let Some(restore_error) = restore_failed {
            self.tickets
                .update_phase(
                    migration_id,
                    MigrationPhase::Failed,
                    TicketUpdate {
                        error: Some(format!("{reason}; home restore failed: {restore_error}")),
                        ..TicketUpdate::default()
                    },
                )
                .await?
        } else {
            self.tickets
                .update_phase(migration_id, MigrationPhase::Aborted, TicketUpdate::default())
                .await?
        };

        self.append_rollback_audit(&terminal, reason).await?;
        Ok(terminal)
    }

    async fn append_rollback_audit(&self, ticket: &MigrationTicket, reason: &str) -> Result<()> {
        self.audit
            .append(
                AuditEntry::new(
                    ticket.agent_id.clone(),
                    phase_audit_action(ticket.phase),
                    AuditLevel::Yellow,
                )
                .with_home(ticket.source.home_id.clone())
                .with_detail(reason.to_string())
                .with_result(ticket.phase.to_string()),
            )
            .await
    }

    /// All non-terminal tickets
    pub async fn list_active(&self) -> Vec<MigrationTicket> {
        self.tickets
            .list(&TicketFilter {
                active_only: true,
                ..TicketFilter::default()
            })
            .await
    }

    /// One ticket's current state
    pub async fn get_status(&self, migration_id: &MigrationId) -> Result<MigrationTicket> {
        self.tickets
            .get(migration_id)
            .await
            .ok_or_else(|| FlockError::not_found("migration", migration_id.as_str()))
    }

    /// The frozen guard: rejects exactly when the agent has a non-terminal
    /// ticket in a frozen phase.
    pub async fn frozen_guard(&self, agent_id: &AgentId) -> FrozenGuardDecision {
        match self.tickets.get_by_agent(agent_id).await {
            Some(ticket) if ticket.phase.is_frozen_phase() => FrozenGuardDecision {
                rejected: true,
                reason: Some(format!(
                    "agent {agent_id} is migrating ({} in phase {})",
                    ticket.migration_id, ticket.phase
                )),
                estimated_downtime_ms: Some(ticket.phase.estimated_downtime_ms()),
            },
            _ => FrozenGuardDecision::clear(),
        }
    }

    /// Fails (or rolls back) tickets that sat in one phase past its
    /// budget. FAILED while ownership is still with the source;
    /// ROLLING_BACK once mid-verify.
    pub async fn enforce_phase_timeouts(&self) -> Vec<MigrationId> {
        let now = Utc::now();
        let mut expired = Vec::new();
        for ticket in self.list_active().await {
            let Some(entered_at) = ticket.phase_entered_at(ticket.phase) else {
                continue;
            };
            let budget = ticket.phase.default_timeout();
            let elapsed = (now - entered_at).to_std().unwrap_or_default();
            if elapsed <= budget {
                continue;
            }
            let timed_out = format!(
                "phase {} exceeded its {}s budget",
                ticket.phase,
                budget.as_secs()
            );
            let result = if ticket.ownership_holder == OwnershipHolder::Source
                || !ticket.phase.can_transition_to(MigrationPhase::RollingBack)
            {
                self.tickets
                    .update_phase(
                        &ticket.migration_id,
                        MigrationPhase::Failed,
                        TicketUpdate {
                            error: Some(timed_out),
                            ..TicketUpdate::default()
                        },
                    )
                    .await
            } else {
                self.tickets
                    .update_phase(
                        &ticket.migration_id,
                        MigrationPhase::RollingBack,
                        TicketUpdate {
                            error: Some(timed_out),
                            ..TicketUpdate::default()
                        },
                    )
                    .await
            };
            match result {
                Ok(_) => expired.push(ticket.migration_id.clone()),
                Err(e) => warn!(migration_id = %ticket.migration_id, error = %e, "timeout enforcement failed"),
            }
        }
        expired
    }
}
