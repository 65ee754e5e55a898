//! Domain identifier types for the Flock control plane
//!
//! This module defines strongly-typed identifier values to prevent primitive
//! obsession and improve type safety throughout the codebase.

use nutype::nutype;
use uuid::Uuid;

/// Unique identifier for an agent (e.g. `"worker-1"`, `"sysadmin"`)
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct AgentId(String);

impl AgentId {
    /// Gets the identifier as a string slice
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// Whether this agent carries the distinguished `sysadmin` role name
    pub fn is_sysadmin(&self) -> bool {
        self.as_str() == "sysadmin"
    }
}

/// Unique identifier for a Flock node (e.g. `"worker-node-1"`)
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        PartialOrd,
        Ord,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct NodeId(String);

impl NodeId {
    /// Gets the identifier as a string slice
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Identifier of one agent home: `"<agent_id>@<node_id>"`
#[nutype(
    validate(predicate = |id| {
        matches!(id.split_once('@'), Some((agent, node)) if !agent.is_empty() && !node.is_empty())
    }),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct HomeId(String);

impl HomeId {
    /// Composes a home id from its agent and node parts.
    ///
    /// # Panics
    ///
    /// Never panics in practice: both parts are validated non-empty, so the
    /// composed string always satisfies the `<agent>@<node>` predicate.
    pub fn compose(agent_id: &AgentId, node_id: &NodeId) -> Self {
        Self::try_new(format!("{agent_id}@{node_id}"))
            .expect("composed home id always contains '@' with non-empty parts")
    }

    /// Gets the identifier as a string slice
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }

    /// The agent part of the home id
    ///
    /// # Panics
    ///
    /// Never panics: the predicate guarantees both parts are valid.
    pub fn agent_id(&self) -> AgentId {
        let (agent, _) = self
            .as_str()
            .split_once('@')
            .expect("home id predicate guarantees '@'");
        AgentId::try_new(agent.to_string()).expect("home id predicate guarantees non-empty agent")
    }

    /// The node part of the home id
    ///
    /// # Panics
    ///
    /// Never panics: the predicate guarantees both parts are valid.
    pub fn node_id(&self) -> NodeId {
        let (_, node) = self
            .as_str()
            .split_once('@')
            .expect("home id predicate guarantees '@'");
        NodeId::try_new(node.to_string()).expect("home id predicate guarantees non-empty node")
    }
}

/// Unique identifier for one in-flight migration
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct MigrationId(String);

impl MigrationId {
    /// Creates a new random migration id.
    ///
    /// # Panics
    ///
    /// Never panics: a formatted UUID is always non-empty.
    pub fn generate() -> Self {
        Self::try_new(format!("mig-{}", Uuid::new_v4())).expect("uuid string is non-empty")
    }

    /// Gets the identifier as a string slice
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Unique identifier for one A2A task record
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a new random task id.
    ///
    /// # Panics
    ///
    /// Never panics: a formatted UUID is always non-empty.
    pub fn generate() -> Self {
        Self::try_new(format!("task-{}", Uuid::new_v4())).expect("uuid string is non-empty")
    }

    /// Gets the identifier as a string slice
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Unique identifier for a discussion channel
#[nutype(
    validate(len_char_min = 1, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        Serialize,
        Deserialize,
        Display,
        TryFrom,
        Into,
        AsRef
    )
)]
pub struct ChannelId(String);

impl ChannelId {
    /// Creates a new random channel id.
    ///
    /// # Panics
    ///
    /// Never panics: a formatted UUID is always non-empty.
    pub fn generate() -> Self {
        Self::try_new(format!("chan-{}", Uuid::new_v4())).expect("uuid string is non-empty")
    }

    /// Gets the identifier as a string slice
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}
