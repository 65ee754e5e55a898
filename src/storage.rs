//! Persistence substrate for the Flock control plane
//!
//! One set of backend-neutral store traits; two conforming implementations:
//! an in-memory backend (testing, ephemeral nodes) and a SQLite backend
//! (WAL journaling, NORMAL synchronous). The contracts are identical:
//!
//! - All writes are synchronous from the caller's viewpoint.
//! - Filters treat `None` as "do not constrain"; `since` means
//!   `timestamp >= since`; `limit` truncates to the most-recent N for
//!   time-ordered queries (audit DESC; homes and transitions ASC; tasks
//!   DESC by `created_at`).
//! - Reads return defensive copies; mutating a returned record never
//!   affects the store.
//! - Row corruption (unknown enum text read back) degrades to a safe
//!   default (`submitted` for tasks, `AWAKE` for loop records) rather than
//!   failing the query.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    AgentLoopRecord, AgentLoopState, AuditEntry, AuditFilter, AuditLevel, BridgeMapping, Channel,
    ChannelMessage, Home, HomeFilter, HomeTransition, TaskFilter, TaskRecord,
};
use crate::domain_types::{AgentId, ChannelId, HomeId, TaskId};
use crate::error::Result;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStores;
pub use sqlite::SqliteStores;

/// Filter for home-transition listings; `None` fields do not constrain
#[derive(Debug, Clone, Default)]
pub struct TransitionFilter {
    /// Only transitions of this home
    pub home_id: Option<HomeId>,
    /// Only transitions with `timestamp >= since`
    pub since: Option<DateTime<Utc>>,
    /// Truncate to the first N (ascending time order)
    pub limit: Option<usize>,
}

/// Persistent storage for homes
#[async_trait]
pub trait HomeStore: Send + Sync {
    /// Inserts a new home; fails on duplicate `home_id`
    async fn insert(&self, home: &Home) -> Result<()>;

    /// Updates an existing home; fails if it does not exist
    async fn update(&self, home: &Home) -> Result<()>;

    /// Fetches one home by id
    async fn get(&self, home_id: &HomeId) -> Result<Option<Home>>;

    /// Lists homes matching the filter, ascending by creation time
    async fn list(&self, filter: &HomeFilter) -> Result<Vec<Home>>;

    /// Counts homes matching the filter
    async fn count(&self, filter: &HomeFilter) -> Result<usize>;

    /// Removes a home (explicit teardown only)
    async fn delete(&self, home_id: &HomeId) -> Result<()>;
}

/// Persistent journal of home state transitions
#[async_trait]
pub trait HomeTransitionStore: Send + Sync {
    /// Appends one transition record
    async fn append(&self, transition: &HomeTransition) -> Result<()>;

    /// Lists transitions matching the filter, ascending by time
    async fn list(&self, filter: &TransitionFilter) -> Result<Vec<HomeTransition>>;
}

/// Append-only audit store
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Appends one audit entry
    async fn append(&self, entry: &AuditEntry) -> Result<()>;

    /// Queries entries newest-first up to `filter.limit`
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>>;

    /// Counts entries per level, for dashboards
    async fn count_by_level(&self) -> Result<HashMap<AuditLevel, usize>>;
}

/// Persistent storage for A2A task records
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a new record; fails on duplicate `task_id`
    async fn insert(&self, record: &TaskRecord) -> Result<()>;

    /// Updates an existing record; fails if it does not exist
    async fn update(&self, record: &TaskRecord) -> Result<()>;

    /// Fetches one record by id
    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>>;

    /// Lists records matching the filter, descending by `created_at`
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>>;

    /// Counts records matching the filter
    async fn count(&self, filter: &TaskFilter) -> Result<usize>;
}

/// Persistent storage for channels
#[async_trait]
pub trait ChannelStore: Send + Sync {
    /// Inserts a new channel; fails on duplicate `channel_id`
    async fn insert(&self, channel: &Channel) -> Result<()>;

    /// Updates an existing channel; fails if it does not exist
    async fn update(&self, channel: &Channel) -> Result<()>;

    /// Fetches one channel by id
    async fn get(&self, channel_id: &ChannelId) -> Result<Option<Channel>>;

    /// Lists channels; `include_archived = false` hides archived ones
    async fn list(&self, include_archived: bool) -> Result<Vec<Channel>>;

    /// Removes a channel (explicit teardown only)
    async fn delete(&self, channel_id: &ChannelId) -> Result<()>;
}

/// Persistent storage for channel messages.
///
/// `append` assigns `seq` server-side under the store's single-writer
/// discipline: strictly increasing per channel, starting at 1.
#[async_trait]
pub trait ChannelMessageStore: Send + Sync {
    /// Appends a message, assigning the next `seq` for the channel
    async fn append(
        &self,
        channel_id: &ChannelId,
        agent_id: &AgentId,
        content: &str,
    ) -> Result<ChannelMessage>;

    /// Lists messages with `seq > after_seq`, ascending, up to `limit`
    async fn list(
        &self,
        channel_id: &ChannelId,
        after_seq: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<ChannelMessage>>;

    /// Counts messages in the channel
    async fn count(&self, channel_id: &ChannelId) -> Result<usize>;
}

/// Persistent storage for work-loop records
#[async_trait]
pub trait AgentLoopStore: Send + Sync {
    /// Creates or resets the record to the requested state (boot-time
    /// convergence)
    async fn init(&self, agent_id: &AgentId, state: AgentLoopState) -> Result<AgentLoopRecord>;

    /// Fetches one record
    async fn get(&self, agent_id: &AgentId) -> Result<Option<AgentLoopRecord>>;

    /// Applies a state change with the stamping rules: SLEEP stamps
    /// `slept_at`, AWAKE clears it and stamps `awakened_at`
    async fn set_state(
        &self,
        agent_id: &AgentId,
        state: AgentLoopState,
        sleep_reason: Option<String>,
    ) -> Result<AgentLoopRecord>;

    /// Stamps `last_tick_at` now
    async fn record_tick(&self, agent_id: &AgentId) -> Result<()>;

    /// Lists records, optionally only those in `state`
    async fn list(&self, state: Option<AgentLoopState>) -> Result<Vec<AgentLoopRecord>>;
}

/// Persistent storage for bridge mappings
#[async_trait]
pub trait BridgeStore: Send + Sync {
    /// Inserts or replaces a mapping by `bridge_id`
    async fn upsert(&self, mapping: &BridgeMapping) -> Result<()>;

    /// Fetches one mapping
    async fn get(&self, bridge_id: &str) -> Result<Option<BridgeMapping>>;

    /// Lists mappings; `active_only` hides disabled ones
    async fn list(&self, active_only: bool) -> Result<Vec<BridgeMapping>>;

    /// Removes a mapping
    async fn delete(&self, bridge_id: &str) -> Result<()>;
}

/// The full set of sub-stores one node runs against.
///
/// Wiring is static at boot: the backend is chosen once and every
/// sub-store comes from the same factory.
#[derive(Clone)]
pub struct FlockStores {
    /// Home records
    pub homes: Arc<dyn HomeStore>,
    /// Home transition journal
    pub transitions: Arc<dyn HomeTransitionStore>,
    /// Audit log
    pub audit: Arc<dyn AuditStore>,
    /// A2A task records
    pub tasks: Arc<dyn TaskStore>,
    /// Channels
    pub channels: Arc<dyn ChannelStore>,
    /// Channel messages
    pub channel_messages: Arc<dyn ChannelMessageStore>,
    /// Work-loop records
    pub agent_loops: Arc<dyn AgentLoopStore>,
    /// Bridge mappings
    pub bridges: Arc<dyn BridgeStore>,
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Memory,
    Sqlite(crate::database::DatabaseConnection),
}

impl FlockStores {
    /// Builds the in-memory backend
    pub fn in_memory() -> Self {
        let stores = MemoryStores::new();
        Self {
            homes: stores.homes(),
            transitions: stores.transitions(),
            audit: stores.audit(),
            tasks: stores.tasks(),
            channels: stores.channels(),
            channel_messages: stores.channel_messages(),
            agent_loops: stores.agent_loops(),
            bridges: stores.bridges(),
            backend: Backend::Memory,
        }
    }

    /// Builds the SQLite backend against `<data_dir>/flock.db`.
    ///
    /// Sub-stores are instantiated lazily against the shared pool and are
    /// valid again after a later `migrate()` call.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be opened or the DDL bootstrap
    /// fails.
    pub async fn sqlite(connection: crate::database::DatabaseConnection) -> Result<Self> {
        let stores = SqliteStores::new(connection.clone());
        stores.migrate().await?;
        Ok(Self {
            homes: stores.homes(),
            transitions: stores.transitions(),
            audit: stores.audit(),
            tasks: stores.tasks(),
            channels: stores.channels(),
            channel_messages: stores.channel_messages(),
            agent_loops: stores.agent_loops(),
            bridges: stores.bridges(),
            backend: Backend::Sqlite(connection),
        })
    }

    /// Idempotent DDL bootstrap.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot apply its schema.
    pub async fn migrate(&self) -> Result<()> {
        match &self.backend {
            Backend::Memory => Ok(()),
            Backend::Sqlite(connection) => {
                SqliteStores::new(connection.clone()).migrate().await
            }
        }
    }

    /// Releases backend resources
    pub async fn close(&self) {
        if let Backend::Sqlite(connection) = &self.backend {
            connection.close().await;
        }
    }
}
