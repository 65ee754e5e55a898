//! In-memory migration ticket store
//!
//! Single-writer per ticket: `update_phase` performs the FSM check and the
//! field update as one atomic operation under the store's write lock, so
//! concurrent transitions on the same ticket serialize and only one
//! commits. All reads return deep clones.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::{MigrationPhase, MigrationTicket, OwnershipHolder};
use crate::domain_types::{AgentId, MigrationId};
use crate::error::{FlockError, Result};

/// Extra fields applied atomically with a phase update
#[derive(Debug, Clone, Default)]
pub struct TicketUpdate {
    /// Flip the ownership holder
    pub ownership_holder: Option<OwnershipHolder>,
    /// Record a terminal or transient error description
    pub error: Option<String>,
    /// Record the target-side reservation handle
    pub reservation_id: Option<String>,
}

/// Filter for ticket listings; `None` fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    /// Only tickets for this agent
    pub agent_id: Option<AgentId>,
    /// Only tickets in this phase
    pub phase: Option<MigrationPhase>,
    /// Only non-terminal tickets
    pub active_only: bool,
}

/// In-memory map of migration tickets
#[derive(Default)]
pub struct TicketStore {
    tickets: RwLock<HashMap<MigrationId, MigrationTicket>>,
}

impl TicketStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fresh ticket.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateMigration` if the agent already has a
    /// non-terminal ticket.
    pub async fn create(&self, ticket: MigrationTicket) -> Result<MigrationTicket> {
        let mut tickets = self.tickets.write().await;
        if let Some(active) = tickets
            .values()
            .find(|t| t.agent_id == ticket.agent_id && !t.phase.is_terminal())
        {
            return Err(FlockError::DuplicateMigration {
                agent_id: ticket.agent_id.clone(),
                migration_id: active.migration_id.to_string(),
            });
        }
        tickets.insert(ticket.migration_id.clone(), ticket.clone());
        Ok(ticket)
    }

    /// Fetches one ticket
    pub async fn get(&self, migration_id: &MigrationId) -> Option<MigrationTicket> {
        self.tickets.read().await.get(migration_id).cloned()
    }

    /// The agent's non-terminal ticket, if one exists
    pub async fn get_by_agent(&self, agent_id: &AgentId) -> Option<MigrationTicket> {
        self.tickets
            .read()
            .await
            .values()
            .find(|t| &t.agent_id == agent_id && !t.phase.is_terminal())
            .cloned()
    }

    /// Moves a ticket along one FSM edge, applying `updates` in the same
    /// store write.
    ///
    /// Stamps `timestamps[to_phase]` with the transition time.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown ticket; `InvalidPhaseTransition` for an
    /// edge outside the declared table.
    pub async fn update_phase(
        &self,
        migration_id: &MigrationId,
        to_phase: MigrationPhase,
        updates: TicketUpdate,
    ) -> Result<MigrationTicket> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(migration_id)
            .ok_or_else(|| FlockError::not_found("migration", migration_id.as_str()))?;

        if !ticket.phase.can_transition_to(to_phase) {
            return Err(FlockError::InvalidPhaseTransition {
                from: ticket.phase.to_string(),
                to: to_phase.to_string(),
            });
        }

        let now = Utc::now();
        ticket.phase = to_phase;
        ticket.timestamps.insert(to_phase.to_string(), now);
        ticket.updated_at = now;
        if let Some(holder) = updates.ownership_holder {
            ticket.ownership_holder = holder;
        }
        if let Some(error) = updates.error {
            ticket.error = Some(error);
        }
        if let Some(reservation_id) = updates.reservation_id {
            ticket.reservation_id = Some(reservation_id);
        }
        Ok(ticket.clone())
    }

    /// Updates non-phase fields without touching the FSM
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown ticket.
    pub async fn update(
        &self,
        migration_id: &MigrationId,
        updates: TicketUpdate,
    ) -> Result<MigrationTicket> {
        let mut tickets = self.tickets.write().await;
        let ticket = tickets
            .get_mut(migration_id)
            .ok_or_else(|| FlockError::not_found("migration", migration_id.as_str()))?;
        if let Some(holder) = updates.ownership_holder {
            ticket.ownership_holder = holder;
        }
        if let Some(error) = updates.error {
            ticket.error = Some(error);
        }
        if let Some(reservation_id) = updates.reservation_id {
            ticket.reservation_id = Some(reservation_id);
        }
        ticket.updated_at = Utc::now();
        Ok(ticket.clone())
    }

    /// Lists tickets matching the filter, oldest first
    pub async fn list(&self, filter: &TicketFilter) -> Vec<MigrationTicket> {
        let tickets = self.tickets.read().await;
        let mut matched: Vec<MigrationTicket> = tickets
            .values()
            .filter(|t| filter.agent_id.as_ref().is_none_or(|a| &t.agent_id == a))
            .filter(|t| filter.phase.is_none_or(|p| t.phase == p))
            .filter(|t| !filter.active_only || !t.phase.is_terminal())
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matched
    }

    /// Removes a ticket
    pub async fn remove(&self, migration_id: &MigrationId) {
        self.tickets.write().await.remove(migration_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MigrationEndpoint, MigrationReason};
    use crate::domain_types::{HomeId, NodeId};

    fn ticket_for(agent_name: &str) -> MigrationTicket {
        let agent = AgentId::try_new(agent_name.to_string()).unwrap();
        let source_node = NodeId::try_new("source-node".to_string()).unwrap();
        let target_node = NodeId::try_new("target-node".to_string()).unwrap();
        MigrationTicket::new(
            agent.clone(),
            MigrationEndpoint {
                home_id: HomeId::compose(&agent, &source_node),
                node_id: source_node,
                endpoint: "http://source:7401/flock".to_string(),
            },
            MigrationEndpoint {
                home_id: HomeId::compose(&agent, &target_node),
                node_id: target_node,
                endpoint: "http://target:7401/flock".to_string(),
            },
            MigrationReason::AgentRequest,
        )
    }

    #[tokio::test]
    async fn test_should_reject_second_ticket_when_agent_has_active_one() {
        let store = TicketStore::new();
        store.create(ticket_for("worker-1")).await.unwrap();
        let err = store.create(ticket_for("worker-1")).await.unwrap_err();
        assert!(matches!(err, FlockError::DuplicateMigration { .. }));
    }

    #[tokio::test]
    async fn test_should_allow_new_ticket_when_previous_is_terminal() {
        let store = TicketStore::new();
        let first = store.create(ticket_for("worker-1")).await.unwrap();
        store
            .update_phase(&first.migration_id, MigrationPhase::Failed, TicketUpdate::default())
            .await
            .unwrap();
        store.create(ticket_for("worker-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_should_stamp_timestamp_when_phase_advances() {
        let store = TicketStore::new();
        let ticket = store.create(ticket_for("worker-1")).await.unwrap();
        let updated = store
            .update_phase(
                &ticket.migration_id,
                MigrationPhase::Authorized,
                TicketUpdate::default(),
            )
            .await
            .unwrap();
        assert_eq!(updated.phase, MigrationPhase::Authorized);
        assert!(updated.phase_entered_at(MigrationPhase::Authorized).is_some());
    }

    #[tokio::test]
    async fn test_should_reject_phase_jump_when_edge_is_not_in_table() {
        let store = TicketStore::new();
        let ticket = store.create(ticket_for("worker-1")).await.unwrap();
        let err = store
            .update_phase(
                &ticket.migration_id,
                MigrationPhase::Completed,
                TicketUpdate::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlockError::InvalidPhaseTransition { .. }));
    }

    #[tokio::test]
    async fn test_should_return_deep_clone_when_reading_ticket() {
        let store = TicketStore::new();
        let ticket = store.create(ticket_for("worker-1")).await.unwrap();
        let mut clone = store.get(&ticket.migration_id).await.unwrap();
        clone.phase = MigrationPhase::Completed;
        assert_eq!(
            store.get(&ticket.migration_id).await.unwrap().phase,
            MigrationPhase::Requested
        );
    }

    #[tokio::test]
    async fn test_should_serialize_concurrent_transitions_when_racing_same_ticket() {
        // Two tasks race REQUESTED -> AUTHORIZED; exactly one commits.
        let store = std::sync::Arc::new(TicketStore::new());
        let ticket = store.create(ticket_for("worker-1")).await.unwrap();

        let a = {
            let store = store.clone();
            let id = ticket.migration_id.clone();
            tokio::spawn(async move {
                store
                    .update_phase(&id, MigrationPhase::Authorized, TicketUpdate::default())
                    .await
            })
        };
        let b = {
            let store = store.clone();
            let id = ticket.migration_id.clone();
            tokio::spawn(async move {
                store
                    .update_phase(&id, MigrationPhase::Authorized, TicketUpdate::default())
                    .await
            })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let committed = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(committed, 1, "exactly one racing transition may commit");
    }
}
