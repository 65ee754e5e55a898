//! Home lifecycle domain types
//!
//! A home is the record of one agent living on one node. Homes move through
//! a strict state machine; every transition is journaled as a
//! [`HomeTransition`] so the full history of a home can be replayed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain_types::{AgentId, HomeId, NodeId};

/// Home lifecycle state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HomeState {
    /// Created but not yet assigned resources
    Unassigned,
    /// Workspace being provisioned
    Provisioning,
    /// Provisioned, no lease held
    Idle,
    /// Leased to an agent session
    Leased,
    /// Agent session actively running
    Active,
    /// Inbound traffic suspended (migration freeze)
    Frozen,
    /// State in flight to another node
    Migrating,
    /// Terminal; the home will never host the agent again
    Retired,
}

impl HomeState {
    /// Gets all valid next states from the current state
    pub fn valid_transitions(&self) -> Vec<Self> {
        match self {
            Self::Unassigned => vec![Self::Provisioning],
            Self::Provisioning => vec![Self::Idle],
            Self::Idle => vec![Self::Leased],
            Self::Leased => vec![Self::Active],
            Self::Active => vec![Self::Leased, Self::Frozen, Self::Retired],
            Self::Frozen => vec![Self::Migrating, Self::Leased, Self::Retired],
            Self::Migrating => vec![Self::Retired, Self::Leased],
            Self::Retired => vec![],
        }
    }

    /// Validates if a transition to the new state is allowed
    pub fn can_transition_to(&self, next: Self) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Checks if the state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Retired)
    }

    /// Parses the canonical SCREAMING_SNAKE_CASE form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNASSIGNED" => Some(Self::Unassigned),
            "PROVISIONING" => Some(Self::Provisioning),
            "IDLE" => Some(Self::Idle),
            "LEASED" => Some(Self::Leased),
            "ACTIVE" => Some(Self::Active),
            "FROZEN" => Some(Self::Frozen),
            "MIGRATING" => Some(Self::Migrating),
            "RETIRED" => Some(Self::Retired),
            _ => None,
        }
    }
}

impl fmt::Display for HomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            Self::Unassigned => "UNASSIGNED",
            Self::Provisioning => "PROVISIONING",
            Self::Idle => "IDLE",
            Self::Leased => "LEASED",
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
            Self::Migrating => "MIGRATING",
            Self::Retired => "RETIRED",
        };
        write!(f, "{state_str}")
    }
}

/// The record of one agent living on one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Home {
    /// Primary key: `"<agent_id>@<node_id>"`
    pub home_id: HomeId,
    /// Agent hosted by this home
    pub agent_id: AgentId,
    /// Node hosting this home
    pub node_id: NodeId,
    /// Current lifecycle state
    pub state: HomeState,
    /// When the current lease expires, if leased
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Free-form metadata attached at provisioning time
    pub metadata: HashMap<String, serde_json::Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Home {
    /// Creates a fresh home in `UNASSIGNED`
    pub fn new(agent_id: AgentId, node_id: NodeId) -> Self {
        let now = Utc::now();
        Self {
            home_id: HomeId::compose(&agent_id, &node_id),
            agent_id,
            node_id,
            state: HomeState::Unassigned,
            lease_expires_at: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One journaled home state transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeTransition {
    /// Home that transitioned
    pub home_id: HomeId,
    /// State before
    pub from_state: HomeState,
    /// State after
    pub to_state: HomeState,
    /// Human-readable reason
    pub reason: String,
    /// Who triggered it (agent id, migration id, "boot", ...)
    pub triggered_by: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

/// Filter for home listing; `None` fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct HomeFilter {
    /// Only homes on this node
    pub node_id: Option<NodeId>,
    /// Only homes for this agent
    pub agent_id: Option<AgentId>,
    /// Only homes in this state
    pub state: Option<HomeState>,
    /// Truncate to the first N (ascending creation order)
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::try_new("worker-1".to_string()).unwrap()
    }

    fn node() -> NodeId {
        NodeId::try_new("node-a".to_string()).unwrap()
    }

    #[test]
    fn test_should_allow_canonical_path_when_walking_home_fsm() {
        let path = [
            HomeState::Unassigned,
            HomeState::Provisioning,
            HomeState::Idle,
            HomeState::Leased,
            HomeState::Active,
            HomeState::Frozen,
            HomeState::Migrating,
            HomeState::Retired,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_should_reject_transition_when_state_is_terminal() {
        assert!(HomeState::Retired.valid_transitions().is_empty());
        assert!(HomeState::Retired.is_terminal());
    }

    #[test]
    fn test_should_allow_unfreeze_when_home_is_frozen() {
        assert!(HomeState::Frozen.can_transition_to(HomeState::Leased));
        assert!(HomeState::Migrating.can_transition_to(HomeState::Leased));
    }

    #[test]
    fn test_should_reject_skip_ahead_when_home_is_unassigned() {
        assert!(!HomeState::Unassigned.can_transition_to(HomeState::Active));
        assert!(!HomeState::Unassigned.can_transition_to(HomeState::Retired));
    }

    #[test]
    fn test_should_round_trip_state_when_parsing_display_form() {
        for state in [
            HomeState::Unassigned,
            HomeState::Provisioning,
            HomeState::Idle,
            HomeState::Leased,
            HomeState::Active,
            HomeState::Frozen,
            HomeState::Migrating,
            HomeState::Retired,
        ] {
            assert_eq!(HomeState::parse(&state.to_string()), Some(state));
        }
        assert_eq!(HomeState::parse("BOGUS"), None);
    }

    #[test]
    fn test_should_start_unassigned_when_creating_home() {
        let home = Home::new(agent(), node());
        assert_eq!(home.state, HomeState::Unassigned);
        assert_eq!(home.home_id.as_str(), "worker-1@node-a");
        assert!(home.lease_expires_at.is_none());
    }
}
