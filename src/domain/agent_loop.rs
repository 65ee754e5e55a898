//! Work-loop state for each agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain_types::AgentId;

/// Work-loop scheduling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentLoopState {
    /// Ticked on the fast cadence
    Awake,
    /// Skipped by the scheduler
    Sleep,
    /// Ticked on the slow cadence
    Reactive,
}

impl AgentLoopState {
    /// Parses the canonical SCREAMING form.
    ///
    /// Unknown text maps to `None`; row-decoding callers degrade that to
    /// [`AgentLoopState::Awake`] per the persistence contract.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AWAKE" => Some(Self::Awake),
            "SLEEP" => Some(Self::Sleep),
            "REACTIVE" => Some(Self::Reactive),
            _ => None,
        }
    }
}

impl fmt::Display for AgentLoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Awake => "AWAKE",
            Self::Sleep => "SLEEP",
            Self::Reactive => "REACTIVE",
        };
        write!(f, "{s}")
    }
}

/// Per-agent work-loop record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLoopRecord {
    /// The agent
    pub agent_id: AgentId,
    /// Scheduling state
    pub state: AgentLoopState,
    /// Last tick delivered
    pub last_tick_at: Option<DateTime<Utc>>,
    /// When the agent last entered AWAKE
    pub awakened_at: Option<DateTime<Utc>>,
    /// When the agent last entered SLEEP
    pub slept_at: Option<DateTime<Utc>>,
    /// Why it went to sleep, if it did
    pub sleep_reason: Option<String>,
}

impl AgentLoopRecord {
    /// Creates a record in the requested state (boot-time convergence)
    pub fn init(agent_id: AgentId, state: AgentLoopState) -> Self {
        let now = Utc::now();
        Self {
            agent_id,
            state,
            last_tick_at: None,
            awakened_at: matches!(state, AgentLoopState::Awake).then_some(now),
            slept_at: matches!(state, AgentLoopState::Sleep).then_some(now),
            sleep_reason: None,
        }
    }

    /// Applies a state change with the stamping rules.
    ///
    /// SLEEP stamps `slept_at`; AWAKE clears `slept_at` and stamps
    /// `awakened_at`.
    pub fn apply_state(&mut self, state: AgentLoopState, sleep_reason: Option<String>) {
        let now = Utc::now();
        self.state = state;
        match state {
            AgentLoopState::Sleep => {
                self.slept_at = Some(now);
                self.sleep_reason = sleep_reason;
            }
            AgentLoopState::Awake => {
                self.slept_at = None;
                self.awakened_at = Some(now);
                self.sleep_reason = None;
            }
            AgentLoopState::Reactive => {
                self.sleep_reason = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::try_new("worker-1".to_string()).unwrap()
    }

    #[test]
    fn test_should_stamp_slept_at_when_setting_sleep() {
        let mut record = AgentLoopRecord::init(agent(), AgentLoopState::Awake);
        record.apply_state(AgentLoopState::Sleep, Some("idle".to_string()));
        assert_eq!(record.state, AgentLoopState::Sleep);
        assert!(record.slept_at.is_some());
        assert_eq!(record.sleep_reason.as_deref(), Some("idle"));
    }

    #[test]
    fn test_should_clear_slept_at_when_waking_up() {
        let mut record = AgentLoopRecord::init(agent(), AgentLoopState::Sleep);
        assert!(record.slept_at.is_some());
        record.apply_state(AgentLoopState::Awake, None);
        assert!(record.slept_at.is_none());
        assert!(record.awakened_at.is_some());
        assert!(record.sleep_reason.is_none());
    }
}
