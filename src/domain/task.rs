//! A2A task records
//!
//! One [`TaskRecord`] is written per `message/send`, created `submitted`
//! by the executor and mutated only by that executor as the task
//! progresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain_types::{AgentId, TaskId};

/// A2A task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    /// Recorded, not yet picked up
    Submitted,
    /// Accepted for processing
    Accepted,
    /// Refused before processing (e.g. frozen agent)
    Rejected,
    /// Session call in flight
    Working,
    /// Waiting on the caller for more input
    InputRequired,
    /// Finished successfully
    Completed,
    /// Finished with an error or timeout
    Failed,
    /// Canceled by the caller
    Canceled,
}

impl TaskState {
    /// Whether the task can still change state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled | Self::Rejected)
    }

    /// Parses the canonical kebab-case form.
    ///
    /// Unknown text maps to `None`; row-decoding callers degrade that to
    /// [`TaskState::Submitted`] per the persistence contract.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "submitted" => Some(Self::Submitted),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "working" => Some(Self::Working),
            "input-required" => Some(Self::InputRequired),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "submitted",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

/// One A2A message/send recorded end to end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task id
    pub task_id: TaskId,
    /// Conversation context this task belongs to
    pub context_id: String,
    /// Sender
    pub from_agent_id: AgentId,
    /// Receiver
    pub to_agent_id: AgentId,
    /// Lifecycle state
    pub state: TaskState,
    /// Flock message type the envelope carried (e.g. `"task"`, `"info"`)
    pub message_type: String,
    /// One-line summary of the inbound text
    pub summary: String,
    /// Structured inbound payload
    pub payload: serde_json::Value,
    /// Assistant reply text, once completed
    pub response_text: Option<String>,
    /// Structured reply payload, if any
    pub response_payload: Option<serde_json::Value>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Terminal timestamp, once finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Creates a fresh `submitted` record
    pub fn submitted(
        from_agent_id: AgentId,
        to_agent_id: AgentId,
        message_type: impl Into<String>,
        summary: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: TaskId::generate(),
            context_id: uuid::Uuid::new_v4().to_string(),
            from_agent_id,
            to_agent_id,
            state: TaskState::Submitted,
            message_type: message_type.into(),
            summary: summary.into(),
            payload,
            response_text: None,
            response_payload: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Filter for task queries; `None` fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Only tasks sent to this agent
    pub to_agent_id: Option<AgentId>,
    /// Only tasks sent by this agent
    pub from_agent_id: Option<AgentId>,
    /// Only tasks in this state
    pub state: Option<TaskState>,
    /// Truncate to the most-recent N (descending `created_at`)
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_parse_input_required_when_given_kebab_form() {
        assert_eq!(TaskState::parse("input-required"), Some(TaskState::InputRequired));
        assert_eq!(TaskState::parse("INPUT_REQUIRED"), None);
    }

    #[test]
    fn test_should_flag_terminal_states_when_task_is_finished() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Canceled.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::Working.is_terminal());
    }

    #[test]
    fn test_should_start_submitted_when_creating_record() {
        let from = AgentId::try_new("orchestrator".to_string()).unwrap();
        let to = AgentId::try_new("worker-1".to_string()).unwrap();
        let record = TaskRecord::submitted(from, to, "task", "do the thing", serde_json::json!({}));
        assert_eq!(record.state, TaskState::Submitted);
        assert!(record.completed_at.is_none());
        assert!(!record.context_id.is_empty());
    }
}
