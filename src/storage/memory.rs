//! In-memory store backend
//!
//! Backs every store trait with process-local maps. Used for tests and
//! ephemeral nodes; contracts are identical to the SQLite backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::domain::{
    AgentLoopRecord, AgentLoopState, AuditEntry, AuditFilter, AuditLevel, BridgeMapping, Channel,
    ChannelMessage, Home, HomeFilter, HomeTransition, TaskFilter, TaskRecord,
};
use crate::domain_types::{AgentId, ChannelId, HomeId, TaskId};
use crate::error::{FlockError, Result};
use crate::storage::{
    AgentLoopStore, AuditStore, BridgeStore, ChannelMessageStore, ChannelStore, HomeStore,
    HomeTransitionStore, TaskStore, TransitionFilter,
};

#[derive(Default)]
struct Inner {
    homes: RwLock<HashMap<HomeId, Home>>,
    transitions: RwLock<Vec<HomeTransition>>,
    audit: RwLock<Vec<AuditEntry>>,
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
    channels: RwLock<HashMap<ChannelId, Channel>>,
    // Mutex, not RwLock: seq assignment is a read-modify-write.
    channel_messages: Mutex<HashMap<ChannelId, Vec<ChannelMessage>>>,
    agent_loops: RwLock<HashMap<AgentId, AgentLoopRecord>>,
    bridges: RwLock<HashMap<String, BridgeMapping>>,
}

/// In-memory backend handle; cheap to clone, all clones share state
#[derive(Clone, Default)]
pub struct MemoryStores {
    inner: Arc<Inner>,
}

impl MemoryStores {
    /// Creates an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Home store view
    pub fn homes(&self) -> Arc<dyn HomeStore> {
        Arc::new(self.clone())
    }

    /// Transition store view
    pub fn transitions(&self) -> Arc<dyn HomeTransitionStore> {
        Arc::new(self.clone())
    }

    /// Audit store view
    pub fn audit(&self) -> Arc<dyn AuditStore> {
        Arc::new(self.clone())
    }

    /// Task store view
    pub fn tasks(&self) -> Arc<dyn TaskStore> {
        Arc::new(self.clone())
    }

    /// Channel store view
    pub fn channels(&self) -> Arc<dyn ChannelStore> {
        Arc::new(self.clone())
    }

    /// Channel message store view
    pub fn channel_messages(&self) -> Arc<dyn ChannelMessageStore> {
        Arc::new(self.clone())
    }

    /// Work-loop store view
    pub fn agent_loops(&self) -> Arc<dyn AgentLoopStore> {
        Arc::new(self.clone())
    }

    /// Bridge store view
    pub fn bridges(&self) -> Arc<dyn BridgeStore> {
        Arc::new(self.clone())
    }
}

fn matches_home(home: &Home, filter: &HomeFilter) -> bool {
    filter.node_id.as_ref().is_none_or(|n| &home.node_id == n)
        && filter.agent_id.as_ref().is_none_or(|a| &home.agent_id == a)
        && filter.state.is_none_or(|s| home.state == s)
}

fn matches_task(task: &TaskRecord, filter: &TaskFilter) -> bool {
    filter
        .to_agent_id
        .as_ref()
        .is_none_or(|a| &task.to_agent_id == a)
        && filter
            .from_agent_id
            .as_ref()
            .is_none_or(|a| &task.from_agent_id == a)
        && filter.state.is_none_or(|s| task.state == s)
}

#[async_trait]
impl HomeStore for MemoryStores {
    async fn insert(&self, home: &Home) -> Result<()> {
        let mut homes = self.inner.homes.write().await;
        if homes.contains_key(&home.home_id) {
            return Err(FlockError::validation(
                "home_id",
                format!("home {} already exists", home.home_id),
            ));
        }
        homes.insert(home.home_id.clone(), home.clone());
        Ok(())
    }

    async fn update(&self, home: &Home) -> Result<()> {
        let mut homes = self.inner.homes.write().await;
        match homes.get_mut(&home.home_id) {
            Some(existing) => {
                *existing = home.clone();
                Ok(())
            }
            None => Err(FlockError::not_found("home", home.home_id.as_str())),
        }
    }

    async fn get(&self, home_id: &HomeId) -> Result<Option<Home>> {
        Ok(self.inner.homes.read().await.get(home_id).cloned())
    }

    async fn list(&self, filter: &HomeFilter) -> Result<Vec<Home>> {
        let homes = self.inner.homes.read().await;
        let mut matched: Vec<Home> = homes
            .values()
            .filter(|home| matches_home(home, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }

    async fn count(&self, filter: &HomeFilter) -> Result<usize> {
        let homes = self.inner.homes.read().await;
        Ok(homes.values().filter(|h| matches_home(h, filter)).count())
    }

    async fn delete(&self, home_id: &HomeId) -> Result<()> {
        self.inner.homes.write().await.remove(home_id);
        Ok(())
    }
}

#[async_trait]
impl HomeTransitionStore for MemoryStores {
    async fn append(&self, transition: &HomeTransition) -> Result<()> {
        self.inner.transitions.write().await.push(transition.clone());
        Ok(())
    }

    async fn list(&self, filter: &TransitionFilter) -> Result<Vec<HomeTransition>> {
        let transitions = self.inner.transitions.read().await;
        let mut matched: Vec<HomeTransition> = transitions
            .iter()
            .filter(|t| filter.home_id.as_ref().is_none_or(|h| &t.home_id == h))
            .filter(|t| filter.since.is_none_or(|since| t.timestamp >= since))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }
}

#[async_trait]
impl AuditStore for MemoryStores {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        self.inner.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let audit = self.inner.audit.read().await;
        let mut matched: Vec<AuditEntry> = audit
            .iter()
            .filter(|e| filter.agent_id.as_ref().is_none_or(|a| &e.agent_id == a))
            .filter(|e| filter.action.as_ref().is_none_or(|act| &e.action == act))
            .filter(|e| filter.level.is_none_or(|l| e.level == l))
            .filter(|e| filter.since.is_none_or(|since| e.timestamp >= since))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count_by_level(&self) -> Result<HashMap<AuditLevel, usize>> {
        let audit = self.inner.audit.read().await;
        let mut counts = HashMap::new();
        for entry in audit.iter() {
            *counts.entry(entry.level).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[async_trait]
impl TaskStore for MemoryStores {
    async fn insert(&self, record: &TaskRecord) -> Result<()> {
        let mut tasks = self.inner.tasks.write().await;
        if tasks.contains_key(&record.task_id) {
            return Err(FlockError::validation(
                "task_id",
                format!("task {} already exists", record.task_id),
            ));
        }
        tasks.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &TaskRecord) -> Result<()> {
        let mut tasks = self.inner.tasks.write().await;
        match tasks.get_mut(&record.task_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(FlockError::not_found("task", record.task_id.as_str())),
        }
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.inner.tasks.read().await.get(task_id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let tasks = self.inner.tasks.read().await;
        let mut matched: Vec<TaskRecord> = tasks
            .values()
            .filter(|t| matches_task(t, filter))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count(&self, filter: &TaskFilter) -> Result<usize> {
        let tasks = self.inner.tasks.read().await;
        Ok(tasks.values().filter(|t| matches_task(t, filter)).count())
    }
}

#[async_trait]
impl ChannelStore for MemoryStores {
    async fn insert(&self, channel: &Channel) -> Result<()> {
        let mut channels = self.inner.channels.write().await;
        if channels.contains_key(&channel.channel_id) {
            return Err(FlockError::validation(
                "channel_id",
                format!("channel {} already exists", channel.channel_id),
            ));
        }
        channels.insert(channel.channel_id.clone(), channel.clone());
        Ok(())
    }

    async fn update(&self, channel: &Channel) -> Result<()> {
        let mut channels = self.inner.channels.write().await;
        match channels.get_mut(&channel.channel_id) {
            Some(existing) => {
                *existing = channel.clone();
                Ok(())
            }
            None => Err(FlockError::not_found("channel", channel.channel_id.as_str())),
        }
    }

    async fn get(&self, channel_id: &ChannelId) -> Result<Option<Channel>> {
        Ok(self.inner.channels.read().await.get(channel_id).cloned())
    }

    async fn list(&self, include_archived: bool) -> Result<Vec<Channel>> {
        let channels = self.inner.channels.read().await;
        let mut matched: Vec<Channel> = channels
            .values()
            .filter(|c| include_archived || !c.archived)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }

    async fn delete(&self, channel_id: &ChannelId) -> Result<()> {
        self.inner.channels.write().await.remove(channel_id);
        Ok(())
    }
}

#[async_trait]
impl ChannelMessageStore for MemoryStores {
    async fn append(
        &self,
        channel_id: &ChannelId,
        agent_id: &AgentId,
        content: &str,
    ) -> Result<ChannelMessage> {
        let mut all = self.inner.channel_messages.lock().await;
        let messages = all.entry(channel_id.clone()).or_default();
        let seq = messages.last().map_or(1, |m| m.seq + 1);
        let message = ChannelMessage {
            channel_id: channel_id.clone(),
            seq,
            agent_id: agent_id.clone(),
            content: content.to_string(),
            timestamp: Utc::now(),
        };
        messages.push(message.clone());
        Ok(message)
    }

    async fn list(
        &self,
        channel_id: &ChannelId,
        after_seq: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<ChannelMessage>> {
        let all = self.inner.channel_messages.lock().await;
        let mut matched: Vec<ChannelMessage> = all
            .get(channel_id)
            .map(|messages| {
                messages
                    .iter()
                    .filter(|m| after_seq.is_none_or(|after| m.seq > after))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn count(&self, channel_id: &ChannelId) -> Result<usize> {
        let all = self.inner.channel_messages.lock().await;
        Ok(all.get(channel_id).map_or(0, Vec::len))
    }
}

#[async_trait]
impl AgentLoopStore for MemoryStores {
    async fn init(&self, agent_id: &AgentId, state: AgentLoopState) -> Result<AgentLoopRecord> {
        let record = AgentLoopRecord::init(agent_id.clone(), state);
        self.inner
            .agent_loops
            .write()
            .await
            .insert(agent_id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, agent_id: &AgentId) -> Result<Option<AgentLoopRecord>> {
        Ok(self.inner.agent_loops.read().await.get(agent_id).cloned())
    }

    async fn set_state(
        &self,
        agent_id: &AgentId,
        state: AgentLoopState,
        sleep_reason: Option<String>,
    ) -> Result<AgentLoopRecord> {
        let mut loops = self.inner.agent_loops.write().await;
        let record = loops
            .get_mut(agent_id)
            .ok_or_else(|| FlockError::not_found("agent-loop", agent_id.as_str()))?;
        record.apply_state(state, sleep_reason);
        Ok(record.clone())
    }

    async fn record_tick(&self, agent_id: &AgentId) -> Result<()> {
        let mut loops = self.inner.agent_loops.write().await;
        let record = loops
            .get_mut(agent_id)
            .ok_or_else(|| FlockError::not_found("agent-loop", agent_id.as_str()))?;
        record.last_tick_at = Some(Utc::now());
        Ok(())
    }

    async fn list(&self, state: Option<AgentLoopState>) -> Result<Vec<AgentLoopRecord>> {
        let loops = self.inner.agent_loops.read().await;
        let mut matched: Vec<AgentLoopRecord> = loops
            .values()
            .filter(|r| state.is_none_or(|s| r.state == s))
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(matched)
    }
}

#[async_trait]
impl BridgeStore for MemoryStores {
    async fn upsert(&self, mapping: &BridgeMapping) -> Result<()> {
        self.inner
            .bridges
            .write()
            .await
            .insert(mapping.bridge_id.clone(), mapping.clone());
        Ok(())
    }

    async fn get(&self, bridge_id: &str) -> Result<Option<BridgeMapping>> {
        Ok(self.inner.bridges.read().await.get(bridge_id).cloned())
    }

    async fn list(&self, active_only: bool) -> Result<Vec<BridgeMapping>> {
        let bridges = self.inner.bridges.read().await;
        let mut matched: Vec<BridgeMapping> = bridges
            .values()
            .filter(|b| !active_only || b.active)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.bridge_id.cmp(&b.bridge_id));
        Ok(matched)
    }

    async fn delete(&self, bridge_id: &str) -> Result<()> {
        self.inner.bridges.write().await.remove(bridge_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HomeState;

    fn agent(name: &str) -> AgentId {
        AgentId::try_new(name.to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_should_reject_duplicate_when_inserting_same_home_twice() {
        let stores = MemoryStores::new();
        let home = Home::new(
            agent("worker-1"),
            crate::domain_types::NodeId::try_new("node-a".to_string()).unwrap(),
        );
        stores.homes().insert(&home).await.unwrap();
        assert!(stores.homes().insert(&home).await.is_err());
    }

    #[tokio::test]
    async fn test_should_return_defensive_copy_when_reading_home() {
        let stores = MemoryStores::new();
        let home = Home::new(
            agent("worker-1"),
            crate::domain_types::NodeId::try_new("node-a".to_string()).unwrap(),
        );
        stores.homes().insert(&home).await.unwrap();

        let mut read_back = stores.homes().get(&home.home_id).await.unwrap().unwrap();
        read_back.state = HomeState::Retired;

        let fresh = stores.homes().get(&home.home_id).await.unwrap().unwrap();
        assert_eq!(fresh.state, HomeState::Unassigned);
    }

    #[tokio::test]
    async fn test_should_assign_contiguous_seq_when_appending_channel_messages() {
        let stores = MemoryStores::new();
        let channel = ChannelId::generate();
        for i in 1..=5 {
            let message = stores
                .channel_messages()
                .append(&channel, &agent("worker-1"), &format!("msg {i}"))
                .await
                .unwrap();
            assert_eq!(message.seq, i);
        }
        let listed = stores
            .channel_messages()
            .list(&channel, Some(2), None)
            .await
            .unwrap();
        assert_eq!(listed.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_should_order_audit_newest_first_when_querying() {
        let stores = MemoryStores::new();
        for action in ["first", "second", "third"] {
            stores
                .audit()
                .append(&AuditEntry::new(agent("worker-1"), action, AuditLevel::Green))
                .await
                .unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        let entries = stores
            .audit()
            .query(&AuditFilter {
                limit: Some(2),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "third");
        assert_eq!(entries[1].action, "second");
    }

    #[tokio::test]
    async fn test_should_reset_record_when_init_is_called_again() {
        let stores = MemoryStores::new();
        let id = agent("worker-1");
        stores
            .agent_loops()
            .init(&id, AgentLoopState::Sleep)
            .await
            .unwrap();
        let record = stores
            .agent_loops()
            .init(&id, AgentLoopState::Awake)
            .await
            .unwrap();
        assert_eq!(record.state, AgentLoopState::Awake);
        assert!(record.slept_at.is_none());
    }
}
