//! Home lifecycle manager
//!
//! The sole mutator of home records. `transition` validates the FSM edge,
//! writes the home update, and journals a [`HomeTransition`]; callers
//! never touch the stores directly.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::domain::{Home, HomeFilter, HomeState, HomeTransition};
use crate::domain_types::{AgentId, HomeId, NodeId};
use crate::error::{FlockError, Result};
use crate::storage::{HomeStore, HomeTransitionStore, TransitionFilter};

/// Manages home records and their state machine
#[derive(Clone)]
pub struct HomeManager {
    homes: Arc<dyn HomeStore>,
    transitions: Arc<dyn HomeTransitionStore>,
}

impl HomeManager {
    /// Creates a manager over the given stores
    pub fn new(homes: Arc<dyn HomeStore>, transitions: Arc<dyn HomeTransitionStore>) -> Self {
        Self { homes, transitions }
    }

    /// Creates a home in `UNASSIGNED`.
    ///
    /// # Errors
    ///
    /// Fails with a validation error if a home for the `(agent, node)` pair
    /// already exists.
    #[instrument(skip(self), fields(agent_id = %agent_id, node_id = %node_id))]
    pub async fn create_home(&self, agent_id: AgentId, node_id: NodeId) -> Result<Home> {
        let home = Home::new(agent_id, node_id);
        self.homes.insert(&home).await?;
        info!(home_id = %home.home_id, "home created");
        Ok(home)
    }

    /// Fetches a home, failing with `NotFound` if it does not exist
    pub async fn get(&self, home_id: &HomeId) -> Result<Home> {
        self.homes
            .get(home_id)
            .await?
            .ok_or_else(|| FlockError::not_found("home", home_id.as_str()))
    }

    /// Lists homes matching the filter
    pub async fn list(&self, filter: &HomeFilter) -> Result<Vec<Home>> {
        self.homes.list(filter).await
    }

    /// Lists the journaled transitions of one home, oldest first
    pub async fn history(&self, home_id: &HomeId) -> Result<Vec<HomeTransition>> {
        self.transitions
            .list(&TransitionFilter {
                home_id: Some(home_id.clone()),
                ..TransitionFilter::default()
            })
            .await
    }

    /// Moves a home along one FSM edge.
    ///
    /// Validates the edge, writes the home row, and appends the transition
    /// record.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown home; `InvalidTransition` for an illegal
    /// edge.
    #[instrument(skip(self), fields(home_id = %home_id, to_state = %to_state))]
    pub async fn transition(
        &self,
        home_id: &HomeId,
        to_state: HomeState,
        reason: &str,
        triggered_by: &str,
    ) -> Result<Home> {
        let mut home = self.get(home_id).await?;
        let from_state = home.state;
        if !from_state.can_transition_to(to_state) {
            return Err(FlockError::InvalidTransition {
                from: from_state.to_string(),
                to: to_state.to_string(),
            });
        }

        home.state = to_state;
        home.updated_at = Utc::now();
        self.homes.update(&home).await?;
        self.transitions
            .append(&HomeTransition {
                home_id: home_id.clone(),
                from_state,
                to_state,
                reason: reason.to_string(),
                triggered_by: triggered_by.to_string(),
                timestamp: home.updated_at,
            })
            .await?;
        info!(from = %from_state, to = %to_state, "home transitioned");
        Ok(home)
    }

    /// Walks a fresh home up to `ACTIVE` through the provisioning chain.
    ///
    /// Used at boot when seeding agent workspaces; each hop is journaled
    /// like any other transition.
    pub async fn activate(&self, home_id: &HomeId, triggered_by: &str) -> Result<Home> {
        let chain = [
            HomeState::Provisioning,
            HomeState::Idle,
            HomeState::Leased,
            HomeState::Active,
        ];
        let mut home = self.get(home_id).await?;
        for target in chain {
            if home.state.can_transition_to(target) {
                home = self
                    .transition(home_id, target, "boot activation", triggered_by)
                    .await?;
            }
        }
        if home.state == HomeState::Active {
            Ok(home)
        } else {
            Err(FlockError::InvalidTransition {
                from: home.state.to_string(),
                to: HomeState::Active.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStores;

    fn manager() -> HomeManager {
        let stores = MemoryStores::new();
        HomeManager::new(stores.homes(), stores.transitions())
    }

    fn agent() -> AgentId {
        AgentId::try_new("worker-1".to_string()).unwrap()
    }

    fn node() -> NodeId {
        NodeId::try_new("node-a".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_should_journal_transition_when_edge_is_legal() {
        let manager = manager();
        let home = manager.create_home(agent(), node()).await.unwrap();
        manager
            .transition(&home.home_id, HomeState::Provisioning, "setup", "boot")
            .await
            .unwrap();

        let history = manager.history(&home.home_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_state, HomeState::Unassigned);
        assert_eq!(history[0].to_state, HomeState::Provisioning);
        assert_eq!(history[0].triggered_by, "boot");
    }

    #[tokio::test]
    async fn test_should_fail_with_invalid_transition_when_edge_is_illegal() {
        let manager = manager();
        let home = manager.create_home(agent(), node()).await.unwrap();
        let err = manager
            .transition(&home.home_id, HomeState::Active, "skip ahead", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, FlockError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_should_fail_with_not_found_when_home_is_unknown() {
        let manager = manager();
        let missing = HomeId::try_new("ghost@nowhere".to_string()).unwrap();
        let err = manager
            .transition(&missing, HomeState::Provisioning, "x", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, FlockError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_should_record_full_chain_when_activating_fresh_home() {
        let manager = manager();
        let home = manager.create_home(agent(), node()).await.unwrap();
        let active = manager.activate(&home.home_id, "boot").await.unwrap();
        assert_eq!(active.state, HomeState::Active);

        let history = manager.history(&home.home_id).await.unwrap();
        let states: Vec<HomeState> = history.iter().map(|t| t.to_state).collect();
        assert_eq!(
            states,
            vec![
                HomeState::Provisioning,
                HomeState::Idle,
                HomeState::Leased,
                HomeState::Active
            ]
        );
    }

    #[tokio::test]
    async fn test_should_match_home_row_when_replaying_transition_journal() {
        // The sequence of journaled to_state values must equal the sequence
        // of states written to the home row.
        let manager = manager();
        let home = manager.create_home(agent(), node()).await.unwrap();
        manager.activate(&home.home_id, "boot").await.unwrap();
        manager
            .transition(&home.home_id, HomeState::Frozen, "migration", "mig-1")
            .await
            .unwrap();
        manager
            .transition(&home.home_id, HomeState::Leased, "rollback", "mig-1")
            .await
            .unwrap();

        let history = manager.history(&home.home_id).await.unwrap();
        let final_home = manager.get(&home.home_id).await.unwrap();
        assert_eq!(history.last().unwrap().to_state, final_home.state);
        // Each journal entry chains onto the previous one.
        for pair in history.windows(2) {
            assert_eq!(pair[0].to_state, pair[1].from_state);
        }
    }
}
