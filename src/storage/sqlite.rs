//! SQLite store backend
//!
//! One `flock.db` file backs every sub-store. Schema bootstrap is
//! idempotent DDL (`CREATE TABLE IF NOT EXISTS` plus indexes) run from
//! `migrate()`; the connection is opened with WAL journaling and
//! synchronous = NORMAL by `crate::database`.
//!
//! Row decoding degrades unknown enum text to the safe defaults required
//! by the persistence contract instead of failing the query.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::warn;

use crate::database::DatabaseConnection;
use crate::domain::{
    AgentLoopRecord, AgentLoopState, AuditEntry, AuditFilter, AuditLevel, BridgeMapping, Channel,
    ChannelMessage, Home, HomeFilter, HomeState, HomeTransition, TaskFilter, TaskRecord, TaskState,
};
use crate::domain_types::{AgentId, ChannelId, HomeId, TaskId};
use crate::error::{FlockError, Result};
use crate::storage::{
    AgentLoopStore, AuditStore, BridgeStore, ChannelMessageStore, ChannelStore, HomeStore,
    HomeTransitionStore, TaskStore, TransitionFilter,
};

const SCHEMA_DDL: &[&str] = &[
    r"CREATE TABLE IF NOT EXISTS homes (
        home_id TEXT PRIMARY KEY,
        agent_id TEXT NOT NULL,
        node_id TEXT NOT NULL,
        state TEXT NOT NULL,
        lease_expires_at INTEGER,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE (agent_id, node_id)
    )",
    r"CREATE TABLE IF NOT EXISTS home_transitions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        home_id TEXT NOT NULL,
        from_state TEXT NOT NULL,
        to_state TEXT NOT NULL,
        reason TEXT NOT NULL,
        triggered_by TEXT NOT NULL,
        timestamp INTEGER NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS audit_entries (
        id TEXT PRIMARY KEY,
        timestamp INTEGER NOT NULL,
        home_id TEXT,
        agent_id TEXT NOT NULL,
        action TEXT NOT NULL,
        level TEXT NOT NULL,
        detail TEXT NOT NULL,
        result TEXT,
        duration_ms INTEGER
    )",
    r"CREATE TABLE IF NOT EXISTS tasks (
        task_id TEXT PRIMARY KEY,
        context_id TEXT NOT NULL,
        from_agent_id TEXT NOT NULL,
        to_agent_id TEXT NOT NULL,
        state TEXT NOT NULL,
        message_type TEXT NOT NULL,
        summary TEXT NOT NULL,
        payload TEXT NOT NULL,
        response_text TEXT,
        response_payload TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        completed_at INTEGER
    )",
    r"CREATE TABLE IF NOT EXISTS channels (
        channel_id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        topic TEXT NOT NULL,
        created_by TEXT NOT NULL,
        members TEXT NOT NULL,
        archived INTEGER NOT NULL DEFAULT 0,
        archive_ready_members TEXT NOT NULL DEFAULT '[]',
        archiving_started_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    r"CREATE TABLE IF NOT EXISTS channel_messages (
        channel_id TEXT NOT NULL,
        seq INTEGER NOT NULL,
        agent_id TEXT NOT NULL,
        content TEXT NOT NULL,
        timestamp INTEGER NOT NULL,
        PRIMARY KEY (channel_id, seq)
    )",
    r"CREATE TABLE IF NOT EXISTS agent_loop_states (
        agent_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        last_tick_at INTEGER,
        awakened_at INTEGER,
        slept_at INTEGER,
        sleep_reason TEXT
    )",
    r"CREATE TABLE IF NOT EXISTS bridges (
        bridge_id TEXT PRIMARY KEY,
        channel_id TEXT NOT NULL,
        platform TEXT NOT NULL,
        external_channel_id TEXT NOT NULL,
        webhook_url TEXT,
        active INTEGER NOT NULL DEFAULT 1
    )",
    r"CREATE INDEX IF NOT EXISTS idx_homes_node_id ON homes (node_id)",
    r"CREATE INDEX IF NOT EXISTS idx_homes_agent_id ON homes (agent_id)",
    r"CREATE INDEX IF NOT EXISTS idx_homes_state ON homes (state)",
    r"CREATE INDEX IF NOT EXISTS idx_home_transitions_home_id ON home_transitions (home_id)",
    r"CREATE INDEX IF NOT EXISTS idx_audit_agent_id ON audit_entries (agent_id)",
    r"CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries (timestamp)",
    r"CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks (created_at)",
    r"CREATE INDEX IF NOT EXISTS idx_tasks_to_agent_id ON tasks (to_agent_id)",
];

const INSERT_HOME: &str = r"
    INSERT INTO homes (home_id, agent_id, node_id, state, lease_expires_at, metadata, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
";

const UPDATE_HOME: &str = r"
    UPDATE homes
    SET state = ?2, lease_expires_at = ?3, metadata = ?4, updated_at = ?5
    WHERE home_id = ?1
";

const INSERT_TRANSITION: &str = r"
    INSERT INTO home_transitions (home_id, from_state, to_state, reason, triggered_by, timestamp)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

const INSERT_AUDIT: &str = r"
    INSERT INTO audit_entries (id, timestamp, home_id, agent_id, action, level, detail, result, duration_ms)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
";

const INSERT_TASK: &str = r"
    INSERT INTO tasks (task_id, context_id, from_agent_id, to_agent_id, state, message_type,
                       summary, payload, response_text, response_payload, created_at, updated_at, completed_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
";

const UPDATE_TASK: &str = r"
    UPDATE tasks
    SET state = ?2, response_text = ?3, response_payload = ?4, updated_at = ?5, completed_at = ?6
    WHERE task_id = ?1
";

const INSERT_CHANNEL: &str = r"
    INSERT INTO channels (channel_id, name, topic, created_by, members, archived,
                          archive_ready_members, archiving_started_at, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
";

const UPDATE_CHANNEL: &str = r"
    UPDATE channels
    SET name = ?2, topic = ?3, members = ?4, archived = ?5, archive_ready_members = ?6,
        archiving_started_at = ?7, updated_at = ?8
    WHERE channel_id = ?1
";

// Seq assignment happens inside the INSERT so it is atomic under SQLite's
// single-writer discipline.
const APPEND_CHANNEL_MESSAGE: &str = r"
    INSERT INTO channel_messages (channel_id, seq, agent_id, content, timestamp)
    VALUES (?1, (SELECT COALESCE(MAX(seq), 0) + 1 FROM channel_messages WHERE channel_id = ?1), ?2, ?3, ?4)
    RETURNING seq
";

const UPSERT_LOOP: &str = r"
    INSERT OR REPLACE INTO agent_loop_states (agent_id, state, last_tick_at, awakened_at, slept_at, sleep_reason)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

const UPSERT_BRIDGE: &str = r"
    INSERT OR REPLACE INTO bridges (bridge_id, channel_id, platform, external_channel_id, webhook_url, active)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
";

fn encode_ts(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn decode_ts(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn decode_opt_ts(ms: Option<i64>) -> Option<DateTime<Utc>> {
    ms.map(decode_ts)
}

fn decode_agent_id(raw: String) -> Result<AgentId> {
    AgentId::try_new(raw).map_err(|e| FlockError::Database {
        message: format!("invalid agent id in row: {e}"),
    })
}

fn decode_json(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or(serde_json::Value::Null)
}

/// SQLite backend handle; cheap to clone, all clones share the pool
#[derive(Clone)]
pub struct SqliteStores {
    connection: DatabaseConnection,
}

impl SqliteStores {
    /// Wraps an initialized connection
    pub fn new(connection: DatabaseConnection) -> Self {
        Self { connection }
    }

    /// Idempotent DDL bootstrap
    ///
    /// # Errors
    ///
    /// Returns an error if any DDL statement fails
    pub async fn migrate(&self) -> Result<()> {
        for ddl in SCHEMA_DDL {
            sqlx::query(ddl).execute(self.connection.pool()).await?;
        }
        Ok(())
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

    fn decode_home(row: &SqliteRow) -> Result<Home> {
        let home_id_raw: String = row.get("home_id");
        let home_id = HomeId::try_new(home_id_raw).map_err(|e| FlockError::Database {
            message: format!("invalid home id in row: {e}"),
        })?;
        let state_raw: String = row.get("state");
        // Home state guards FSM integrity; unknown text is a hard error.
        let state = HomeState::parse(&state_raw).ok_or_else(|| FlockError::Database {
            message: format!("unknown home state in row: {state_raw}"),
        })?;
        let metadata_raw: String = row.get("metadata");
        Ok(Home {
            agent_id: home_id.agent_id(),
            node_id: home_id.node_id(),
            home_id,
            state,
            lease_expires_at: decode_opt_ts(row.get("lease_expires_at")),
            metadata: serde_json::from_str(&metadata_raw).unwrap_or_default(),
            created_at: decode_ts(row.get("created_at")),
            updated_at: decode_ts(row.get("updated_at")),
        })
    }

    fn decode_task(row: &SqliteRow) -> Result<TaskRecord> {
        let task_id_raw: String = row.get("task_id");
        let task_id = TaskId::try_new(task_id_raw).map_err(|e| FlockError::Database {
            message: format!("invalid task id in row: {e}"),
        })?;
        let state_raw: String = row.get("state");
        let state = TaskState::parse(&state_raw).unwrap_or_else(|| {
            warn!(state = %state_raw, "unknown task state in row, defaulting to submitted");
            TaskState::Submitted
        });
        let payload_raw: String = row.get("payload");
        let response_payload_raw: Option<String> = row.get("response_payload");
        Ok(TaskRecord {
            task_id,
            context_id: row.get("context_id"),
            from_agent_id: decode_agent_id(row.get("from_agent_id"))?,
            to_agent_id: decode_agent_id(row.get("to_agent_id"))?,
            state,
            message_type: row.get("message_type"),
            summary: row.get("summary"),
            payload: decode_json(&payload_raw),
            response_text: row.get("response_text"),
            response_payload: response_payload_raw.map(|raw| decode_json(&raw)),
            created_at: decode_ts(row.get("created_at")),
            updated_at: decode_ts(row.get("updated_at")),
            completed_at: decode_opt_ts(row.get("completed_at")),
        })
    }

    fn decode_transition(row: &SqliteRow) -> Result<HomeTransition> {
        let home_id_raw: String = row.get("home_id");
        let home_id = HomeId::try_new(home_id_raw).map_err(|e| FlockError::Database {
            message: format!("invalid home id in row: {e}"),
        })?;
        let from_raw: String = row.get("from_state");
        let to_raw: String = row.get("to_state");
        let from_state = HomeState::parse(&from_raw).ok_or_else(|| FlockError::Database {
            message: format!("unknown home state in row: {from_raw}"),
        })?;
        let to_state = HomeState::parse(&to_raw).ok_or_else(|| FlockError::Database {
            message: format!("unknown home state in row: {to_raw}"),
        })?;
        Ok(HomeTransition {
            home_id,
            from_state,
            to_state,
            reason: row.get("reason"),
            triggered_by: row.get("triggered_by"),
            timestamp: decode_ts(row.get("timestamp")),
        })
    }

    fn decode_audit(row: &SqliteRow) -> Result<AuditEntry> {
        let home_id_raw: Option<String> = row.get("home_id");
        let level_raw: String = row.get("level");
        let level = AuditLevel::parse(&level_raw).unwrap_or_else(|| {
            warn!(level = %level_raw, "unknown audit level in row, defaulting to WHITE");
            AuditLevel::White
        });
        let duration_ms: Option<i64> = row.get("duration_ms");
        Ok(AuditEntry {
            id: row.get("id"),
            timestamp: decode_ts(row.get("timestamp")),
            home_id: home_id_raw.and_then(|raw| HomeId::try_new(raw).ok()),
            agent_id: decode_agent_id(row.get("agent_id"))?,
            action: row.get("action"),
            level,
            detail: row.get("detail"),
            result: row.get("result"),
            duration_ms: duration_ms.and_then(|d| u64::try_from(d).ok()),
        })
    }

    fn decode_channel(row: &SqliteRow) -> Result<Channel> {
        let channel_id_raw: String = row.get("channel_id");
        let channel_id = ChannelId::try_new(channel_id_raw).map_err(|e| FlockError::Database {
            message: format!("invalid channel id in row: {e}"),
        })?;
        let members_raw: String = row.get("members");
        let ready_raw: String = row.get("archive_ready_members");
        Ok(Channel {
            channel_id,
            name: row.get("name"),
            topic: row.get("topic"),
            created_by: decode_agent_id(row.get("created_by"))?,
            members: serde_json::from_str(&members_raw).unwrap_or_default(),
            archived: row.get::<i64, _>("archived") != 0,
            archive_ready_members: serde_json::from_str(&ready_raw).unwrap_or_default(),
            archiving_started_at: decode_opt_ts(row.get("archiving_started_at")),
            created_at: decode_ts(row.get("created_at")),
            updated_at: decode_ts(row.get("updated_at")),
        })
    }

    fn decode_loop(row: &SqliteRow) -> Result<AgentLoopRecord> {
        let state_raw: String = row.get("state");
        let state = AgentLoopState::parse(&state_raw).unwrap_or_else(|| {
            warn!(state = %state_raw, "unknown loop state in row, defaulting to AWAKE");
            AgentLoopState::Awake
        });
        Ok(AgentLoopRecord {
            agent_id: decode_agent_id(row.get("agent_id"))?,
            state,
            last_tick_at: decode_opt_ts(row.get("last_tick_at")),
            awakened_at: decode_opt_ts(row.get("awakened_at")),
            slept_at: decode_opt_ts(row.get("slept_at")),
            sleep_reason: row.get("sleep_reason"),
        })
    }

    fn decode_bridge(row: &SqliteRow) -> Result<BridgeMapping> {
        let channel_id_raw: String = row.get("channel_id");
        let channel_id = ChannelId::try_new(channel_id_raw).map_err(|e| FlockError::Database {
            message: format!("invalid channel id in row: {e}"),
        })?;
        Ok(BridgeMapping {
            bridge_id: row.get("bridge_id"),
            channel_id,
            platform: row.get("platform"),
            external_channel_id: row.get("external_channel_id"),
            webhook_url: row.get("webhook_url"),
            active: row.get::<i64, _>("active") != 0,
        })
    }

    async fn persist_loop(&self, record: &AgentLoopRecord) -> Result<()> {
        sqlx::query(UPSERT_LOOP)
            .bind(record.agent_id.to_string())
            .bind(record.state.to_string())
            .bind(record.last_tick_at.map(encode_ts))
            .bind(record.awakened_at.map(encode_ts))
            .bind(record.slept_at.map(encode_ts))
            .bind(record.sleep_reason.clone())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}

fn home_filter_sql(filter: &HomeFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    if let Some(node_id) = &filter.node_id {
        clauses.push(format!("node_id = ?{}", binds.len() + 1));
        binds.push(node_id.to_string());
    }
    if let Some(agent_id) = &filter.agent_id {
        clauses.push(format!("agent_id = ?{}", binds.len() + 1));
        binds.push(agent_id.to_string());
    }
    if let Some(state) = filter.state {
        clauses.push(format!("state = ?{}", binds.len() + 1));
        binds.push(state.to_string());
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, binds)
}

fn task_filter_sql(filter: &TaskFilter) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();
    if let Some(to_agent) = &filter.to_agent_id {
        clauses.push(format!("to_agent_id = ?{}", binds.len() + 1));
        binds.push(to_agent.to_string());
    }
    if let Some(from_agent) = &filter.from_agent_id {
        clauses.push(format!("from_agent_id = ?{}", binds.len() + 1));
        binds.push(from_agent.to_string());
    }
    if let Some(state) = filter.state {
        clauses.push(format!("state = ?{}", binds.len() + 1));
        binds.push(state.to_string());
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (where_sql, binds)
}

#[async_trait]
impl HomeStore for SqliteStores {
    async fn insert(&self, home: &Home) -> Result<()> {
        sqlx::query(INSERT_HOME)
            .bind(home.home_id.to_string())
            .bind(home.agent_id.to_string())
            .bind(home.node_id.to_string())
            .bind(home.state.to_string())
            .bind(home.lease_expires_at.map(encode_ts))
            .bind(serde_json::to_string(&home.metadata)?)
            .bind(encode_ts(home.created_at))
            .bind(encode_ts(home.updated_at))
            .execute(self.connection.pool())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    FlockError::validation("home_id", format!("home {} already exists", home.home_id))
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn update(&self, home: &Home) -> Result<()> {
        let result = sqlx::query(UPDATE_HOME)
            .bind(home.home_id.to_string())
            .bind(home.state.to_string())
            .bind(home.lease_expires_at.map(encode_ts))
            .bind(serde_json::to_string(&home.metadata)?)
            .bind(encode_ts(home.updated_at))
            .execute(self.connection.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(FlockError::not_found("home", home.home_id.as_str()));
        }
        Ok(())
    }

    async fn get(&self, home_id: &HomeId) -> Result<Option<Home>> {
        let row = sqlx::query("SELECT * FROM homes WHERE home_id = ?1")
            .bind(home_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::decode_home).transpose()
    }

    async fn list(&self, filter: &HomeFilter) -> Result<Vec<Home>> {
        let (where_sql, binds) = home_filter_sql(filter);
        let sql = match filter.limit {
            // Most-recent N, still returned ascending.
            Some(limit) => format!(
                "SELECT * FROM (SELECT * FROM homes {where_sql} ORDER BY created_at DESC LIMIT {limit}) ORDER BY created_at ASC"
            ),
            None => format!("SELECT * FROM homes {where_sql} ORDER BY created_at ASC"),
        };
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::decode_home).collect()
    }

    async fn count(&self, filter: &HomeFilter) -> Result<usize> {
        let (where_sql, binds) = home_filter_sql(filter);
        let sql = format!("SELECT COUNT(*) AS n FROM homes {where_sql}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(self.connection.pool()).await?;
        let n: i64 = row.get("n");
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn delete(&self, home_id: &HomeId) -> Result<()> {
        sqlx::query("DELETE FROM homes WHERE home_id = ?1")
            .bind(home_id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl HomeTransitionStore for SqliteStores {
    async fn append(&self, transition: &HomeTransition) -> Result<()> {
        sqlx::query(INSERT_TRANSITION)
            .bind(transition.home_id.to_string())
            .bind(transition.from_state.to_string())
            .bind(transition.to_state.to_string())
            .bind(&transition.reason)
            .bind(&transition.triggered_by)
            .bind(encode_ts(transition.timestamp))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn list(&self, filter: &TransitionFilter) -> Result<Vec<HomeTransition>> {
        let mut clauses = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(home_id) = &filter.home_id {
            clauses.push(format!("home_id = ?{}", binds.len() + 1));
            binds.push(home_id.to_string());
        }
        if let Some(since) = filter.since {
            clauses.push(format!("timestamp >= ?{}", binds.len() + 1));
            binds.push(encode_ts(since).to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = match filter.limit {
            Some(limit) => format!(
                "SELECT * FROM (SELECT * FROM home_transitions {where_sql} ORDER BY id DESC LIMIT {limit}) ORDER BY id ASC"
            ),
            None => format!("SELECT * FROM home_transitions {where_sql} ORDER BY id ASC"),
        };
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::decode_transition).collect()
    }
}

#[async_trait]
impl AuditStore for SqliteStores {
    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(INSERT_AUDIT)
            .bind(&entry.id)
            .bind(encode_ts(entry.timestamp))
            .bind(entry.home_id.as_ref().map(ToString::to_string))
            .bind(entry.agent_id.to_string())
            .bind(&entry.action)
            .bind(entry.level.to_string())
            .bind(&entry.detail)
            .bind(entry.result.clone())
            .bind(entry.duration_ms.and_then(|d| i64::try_from(d).ok()))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        let mut clauses = Vec::new();
        let mut binds: Vec<String> = Vec::new();
        if let Some(agent_id) = &filter.agent_id {
            clauses.push(format!("agent_id = ?{}", binds.len() + 1));
            binds.push(agent_id.to_string());
        }
        if let Some(action) = &filter.action {
            clauses.push(format!("action = ?{}", binds.len() + 1));
            binds.push(action.clone());
        }
        if let Some(level) = filter.level {
            clauses.push(format!("level = ?{}", binds.len() + 1));
            binds.push(level.to_string());
        }
        if let Some(since) = filter.since {
            clauses.push(format!("timestamp >= ?{}", binds.len() + 1));
            binds.push(encode_ts(since).to_string());
        }
        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit_sql = filter
            .limit
            .map_or(String::new(), |limit| format!("LIMIT {limit}"));
        let sql = format!(
            "SELECT * FROM audit_entries {where_sql} ORDER BY timestamp DESC, id DESC {limit_sql}"
        );
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::decode_audit).collect()
    }

    async fn count_by_level(&self) -> Result<HashMap<AuditLevel, usize>> {
        let rows =
            sqlx::query("SELECT level, COUNT(*) AS n FROM audit_entries GROUP BY level")
                .fetch_all(self.connection.pool())
                .await?;
        let mut counts = HashMap::new();
        for row in rows {
            let level_raw: String = row.get("level");
            if let Some(level) = AuditLevel::parse(&level_raw) {
                let n: i64 = row.get("n");
                counts.insert(level, usize::try_from(n).unwrap_or(0));
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl TaskStore for SqliteStores {
    async fn insert(&self, record: &TaskRecord) -> Result<()> {
        sqlx::query(INSERT_TASK)
            .bind(record.task_id.to_string())
            .bind(&record.context_id)
            .bind(record.from_agent_id.to_string())
            .bind(record.to_agent_id.to_string())
            .bind(record.state.to_string())
            .bind(&record.message_type)
            .bind(&record.summary)
            .bind(serde_json::to_string(&record.payload)?)
            .bind(record.response_text.clone())
            .bind(
                record
                    .response_payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(encode_ts(record.created_at))
            .bind(encode_ts(record.updated_at))
            .bind(record.completed_at.map(encode_ts))
            .execute(self.connection.pool())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    FlockError::validation(
                        "task_id",
                        format!("task {} already exists", record.task_id),
                    )
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn update(&self, record: &TaskRecord) -> Result<()> {
        let result = sqlx::query(UPDATE_TASK)
            .bind(record.task_id.to_string())
            .bind(record.state.to_string())
            .bind(record.response_text.clone())
            .bind(
                record
                    .response_payload
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
            )
            .bind(encode_ts(record.updated_at))
            .bind(record.completed_at.map(encode_ts))
            .execute(self.connection.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(FlockError::not_found("task", record.task_id.as_str()));
        }
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::decode_task).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<TaskRecord>> {
        let (where_sql, binds) = task_filter_sql(filter);
        let limit_sql = filter
            .limit
            .map_or(String::new(), |limit| format!("LIMIT {limit}"));
        let sql =
            format!("SELECT * FROM tasks {where_sql} ORDER BY created_at DESC {limit_sql}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let rows = query.fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::decode_task).collect()
    }

    async fn count(&self, filter: &TaskFilter) -> Result<usize> {
        let (where_sql, binds) = task_filter_sql(filter);
        let sql = format!("SELECT COUNT(*) AS n FROM tasks {where_sql}");
        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        let row = query.fetch_one(self.connection.pool()).await?;
        let n: i64 = row.get("n");
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[async_trait]
impl ChannelStore for SqliteStores {
    async fn insert(&self, channel: &Channel) -> Result<()> {
        sqlx::query(INSERT_CHANNEL)
            .bind(channel.channel_id.to_string())
            .bind(&channel.name)
            .bind(&channel.topic)
            .bind(channel.created_by.to_string())
            .bind(serde_json::to_string(&channel.members)?)
            .bind(i64::from(channel.archived))
            .bind(serde_json::to_string(&channel.archive_ready_members)?)
            .bind(channel.archiving_started_at.map(encode_ts))
            .bind(encode_ts(channel.created_at))
            .bind(encode_ts(channel.updated_at))
            .execute(self.connection.pool())
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    FlockError::validation(
                        "channel_id",
                        format!("channel {} already exists", channel.channel_id),
                    )
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn update(&self, channel: &Channel) -> Result<()> {
        let result = sqlx::query(UPDATE_CHANNEL)
            .bind(channel.channel_id.to_string())
            .bind(&channel.name)
            .bind(&channel.topic)
            .bind(serde_json::to_string(&channel.members)?)
            .bind(i64::from(channel.archived))
            .bind(serde_json::to_string(&channel.archive_ready_members)?)
            .bind(channel.archiving_started_at.map(encode_ts))
            .bind(encode_ts(channel.updated_at))
            .execute(self.connection.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(FlockError::not_found("channel", channel.channel_id.as_str()));
        }
        Ok(())
    }

    async fn get(&self, channel_id: &ChannelId) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE channel_id = ?1")
            .bind(channel_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::decode_channel).transpose()
    }

    async fn list(&self, include_archived: bool) -> Result<Vec<Channel>> {
        let sql = if include_archived {
            "SELECT * FROM channels ORDER BY created_at ASC"
        } else {
            "SELECT * FROM channels WHERE archived = 0 ORDER BY created_at ASC"
        };
        let rows = sqlx::query(sql).fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::decode_channel).collect()
    }

    async fn delete(&self, channel_id: &ChannelId) -> Result<()> {
        sqlx::query("DELETE FROM channels WHERE channel_id = ?1")
            .bind(channel_id.to_string())
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChannelMessageStore for SqliteStores {
    async fn append(
        &self,
        channel_id: &ChannelId,
        agent_id: &AgentId,
        content: &str,
    ) -> Result<ChannelMessage> {
        let now = Utc::now();
        let row = sqlx::query(APPEND_CHANNEL_MESSAGE)
            .bind(channel_id.to_string())
            .bind(agent_id.to_string())
            .bind(content)
            .bind(encode_ts(now))
            .fetch_one(self.connection.pool())
            .await?;
        let seq: i64 = row.get("seq");
        Ok(ChannelMessage {
            channel_id: channel_id.clone(),
            seq: u64::try_from(seq).unwrap_or(0),
            agent_id: agent_id.clone(),
            content: content.to_string(),
            timestamp: now,
        })
    }

    async fn list(
        &self,
        channel_id: &ChannelId,
        after_seq: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<ChannelMessage>> {
        let after = after_seq.map_or(0, |seq| i64::try_from(seq).unwrap_or(i64::MAX));
        let limit_sql = limit.map_or(String::new(), |limit| format!("LIMIT {limit}"));
        let sql = format!(
            "SELECT * FROM channel_messages WHERE channel_id = ?1 AND seq > ?2 ORDER BY seq ASC {limit_sql}"
        );
        let rows = sqlx::query(&sql)
            .bind(channel_id.to_string())
            .bind(after)
            .fetch_all(self.connection.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let seq: i64 = row.get("seq");
                Ok(ChannelMessage {
                    channel_id: channel_id.clone(),
                    seq: u64::try_from(seq).unwrap_or(0),
                    agent_id: decode_agent_id(row.get("agent_id"))?,
                    content: row.get("content"),
                    timestamp: decode_ts(row.get("timestamp")),
                })
            })
            .collect()
    }

    async fn count(&self, channel_id: &ChannelId) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM channel_messages WHERE channel_id = ?1")
            .bind(channel_id.to_string())
            .fetch_one(self.connection.pool())
            .await?;
        let n: i64 = row.get("n");
        Ok(usize::try_from(n).unwrap_or(0))
    }
}

#[async_trait]
impl AgentLoopStore for SqliteStores {
    async fn init(&self, agent_id: &AgentId, state: AgentLoopState) -> Result<AgentLoopRecord> {
        let record = AgentLoopRecord::init(agent_id.clone(), state);
        self.persist_loop(&record).await?;
        Ok(record)
    }

    async fn get(&self, agent_id: &AgentId) -> Result<Option<AgentLoopRecord>> {
        let row = sqlx::query("SELECT * FROM agent_loop_states WHERE agent_id = ?1")
            .bind(agent_id.to_string())
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::decode_loop).transpose()
    }

    async fn set_state(
        &self,
        agent_id: &AgentId,
        state: AgentLoopState,
        sleep_reason: Option<String>,
    ) -> Result<AgentLoopRecord> {
        let mut record = AgentLoopStore::get(self, agent_id)
            .await?
            .ok_or_else(|| FlockError::not_found("agent-loop", agent_id.as_str()))?;
        record.apply_state(state, sleep_reason);
        self.persist_loop(&record).await?;
        Ok(record)
    }

    async fn record_tick(&self, agent_id: &AgentId) -> Result<()> {
        let result = sqlx::query("UPDATE agent_loop_states SET last_tick_at = ?2 WHERE agent_id = ?1")
            .bind(agent_id.to_string())
            .bind(encode_ts(Utc::now()))
            .execute(self.connection.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(FlockError::not_found("agent-loop", agent_id.as_str()));
        }
        Ok(())
    }

    async fn list(&self, state: Option<AgentLoopState>) -> Result<Vec<AgentLoopRecord>> {
        let rows = match state {
            Some(state) => {
                sqlx::query("SELECT * FROM agent_loop_states WHERE state = ?1 ORDER BY agent_id ASC")
                    .bind(state.to_string())
                    .fetch_all(self.connection.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM agent_loop_states ORDER BY agent_id ASC")
                    .fetch_all(self.connection.pool())
                    .await?
            }
        };
        rows.iter().map(Self::decode_loop).collect()
    }
}

#[async_trait]
impl BridgeStore for SqliteStores {
    async fn upsert(&self, mapping: &BridgeMapping) -> Result<()> {
        sqlx::query(UPSERT_BRIDGE)
            .bind(&mapping.bridge_id)
            .bind(mapping.channel_id.to_string())
            .bind(&mapping.platform)
            .bind(&mapping.external_channel_id)
            .bind(mapping.webhook_url.clone())
            .bind(i64::from(mapping.active))
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }

    async fn get(&self, bridge_id: &str) -> Result<Option<BridgeMapping>> {
        let row = sqlx::query("SELECT * FROM bridges WHERE bridge_id = ?1")
            .bind(bridge_id)
            .fetch_optional(self.connection.pool())
            .await?;
        row.as_ref().map(Self::decode_bridge).transpose()
    }

    async fn list(&self, active_only: bool) -> Result<Vec<BridgeMapping>> {
        let sql = if active_only {
            "SELECT * FROM bridges WHERE active = 1 ORDER BY bridge_id ASC"
        } else {
            "SELECT * FROM bridges ORDER BY bridge_id ASC"
        };
        let rows = sqlx::query(sql).fetch_all(self.connection.pool()).await?;
        rows.iter().map(Self::decode_bridge).collect()
    }

    async fn delete(&self, bridge_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM bridges WHERE bridge_id = ?1")
            .bind(bridge_id)
            .execute(self.connection.pool())
            .await?;
        Ok(())
    }
}
