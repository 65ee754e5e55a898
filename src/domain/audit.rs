//! Append-only audit domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain_types::{AgentId, HomeId};

/// Four-tone audit ranking.
///
/// GREEN is auto-approved, YELLOW needs review, RED is dangerous, WHITE
/// means the event was not observed by triage at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLevel {
    /// Auto-approved
    Green,
    /// Needs review
    Yellow,
    /// Dangerous
    Red,
    /// Unobserved (no triage decision existed)
    White,
}

impl AuditLevel {
    /// Parses the canonical SCREAMING form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GREEN" => Some(Self::Green),
            "YELLOW" => Some(Self::Yellow),
            "RED" => Some(Self::Red),
            "WHITE" => Some(Self::White),
            _ => None,
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Green => "GREEN",
            Self::Yellow => "YELLOW",
            Self::Red => "RED",
            Self::White => "WHITE",
        };
        write!(f, "{s}")
    }
}

/// One structured audit event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id
    pub id: String,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Home involved, if any
    pub home_id: Option<HomeId>,
    /// Agent the event is about
    pub agent_id: AgentId,
    /// Machine-readable action name (e.g. `"a2a-message"`)
    pub action: String,
    /// Severity tone
    pub level: AuditLevel,
    /// Human-readable detail
    pub detail: String,
    /// Outcome, if the action has one
    pub result: Option<String>,
    /// Wall-clock duration in milliseconds, if measured
    pub duration_ms: Option<u64>,
}

impl AuditEntry {
    /// Builds an entry stamped now with a fresh id
    pub fn new(agent_id: AgentId, action: impl Into<String>, level: AuditLevel) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            home_id: None,
            agent_id,
            action: action.into(),
            level,
            detail: String::new(),
            result: None,
            duration_ms: None,
        }
    }

    /// Attaches detail text
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    /// Attaches the home involved
    #[must_use]
    pub fn with_home(mut self, home_id: HomeId) -> Self {
        self.home_id = Some(home_id);
        self
    }

    /// Attaches an outcome string
    #[must_use]
    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    /// Attaches a measured duration
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Filter for audit queries; `None` fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Only events for this agent
    pub agent_id: Option<AgentId>,
    /// Only events with this action
    pub action: Option<String>,
    /// Only events at this level
    pub level: Option<AuditLevel>,
    /// Only events with `timestamp >= since`
    pub since: Option<DateTime<Utc>>,
    /// Truncate to the most-recent N (descending time order)
    pub limit: Option<usize>,
}
