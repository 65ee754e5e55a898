//! Group discussion primitives: channels, channel messages, bridges

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain_types::{AgentId, ChannelId};

/// A named group discussion among agents.
///
/// Members, once added, are never silently removed by others; archival is
/// cooperative via the `archive_ready_members` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Unique channel id
    pub channel_id: ChannelId,
    /// Display name
    pub name: String,
    /// Topic line
    pub topic: String,
    /// Creator
    pub created_by: AgentId,
    /// Current members
    pub members: Vec<AgentId>,
    /// Whether the channel has been archived
    pub archived: bool,
    /// Members that have acknowledged archival
    pub archive_ready_members: Vec<AgentId>,
    /// When cooperative archival began, if it has
    pub archiving_started_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Channel {
    /// Creates a fresh channel with the creator as sole member
    pub fn new(name: impl Into<String>, topic: impl Into<String>, created_by: AgentId) -> Self {
        let now = Utc::now();
        Self {
            channel_id: ChannelId::generate(),
            name: name.into(),
            topic: topic.into(),
            members: vec![created_by.clone()],
            created_by,
            archived: false,
            archive_ready_members: Vec::new(),
            archiving_started_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One message in a channel.
///
/// `seq` is assigned server-side at append time and is strictly increasing
/// per channel, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Channel this message belongs to
    pub channel_id: ChannelId,
    /// Per-channel monotonic sequence number
    pub seq: u64,
    /// Author
    pub agent_id: AgentId,
    /// Message body
    pub content: String,
    /// Append timestamp
    pub timestamp: DateTime<Utc>,
}

/// External-platform linkage for a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeMapping {
    /// Unique bridge id
    pub bridge_id: String,
    /// Channel bridged
    pub channel_id: ChannelId,
    /// Platform name (e.g. `"slack"`)
    pub platform: String,
    /// The platform's channel identifier
    pub external_channel_id: String,
    /// Outbound webhook, if the platform uses one
    pub webhook_url: Option<String>,
    /// Whether the bridge is live
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_include_creator_as_member_when_creating_channel() {
        let creator = AgentId::try_new("worker-1".to_string()).unwrap();
        let channel = Channel::new("planning", "sprint planning", creator.clone());
        assert_eq!(channel.members, vec![creator]);
        assert!(!channel.archived);
        assert!(channel.archive_ready_members.is_empty());
    }
}
