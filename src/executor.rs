//! Per-agent request executor
//!
//! Converts an inbound A2A message into a session prompt, runs the LLM
//! session under a timeout, and turns the reply into a `response` artifact.
//! Every request is recorded as a [`TaskRecord`] (created `submitted`,
//! finished `completed` or `failed`) and one audit entry: GREEN on
//! success, YELLOW for sysadmin review or timeout, RED on failure.
//!
//! Executors run in parallel across agents but are serialized per agent:
//! the per-agent session is not re-entrant, so a second request to the
//! same agent awaits the first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::a2a::rpc::{Artifact, TaskView};
use crate::audit::AuditLog;
use crate::domain::{
    A2aMessage, AgentRole, AuditEntry, AuditLevel, FlockType, TaskRecord, TaskState,
};
use crate::domain_types::{AgentId, NodeId};
use crate::error::Result;
use crate::session::{SessionConfig, SessionLayer};
use crate::storage::TaskStore;
use crate::triage::TriageCaptureTable;

/// Default bound on one session call
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Handles A2A requests for one registered agent
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    /// Executes one `message/send` and returns the task object
    async fn execute(&self, from: AgentId, message: A2aMessage) -> Result<TaskView>;
}

/// The standard executor: task record + LLM session + artifacts + audit
pub struct SessionExecutor {
    agent_id: AgentId,
    node_id: NodeId,
    role: AgentRole,
    session: Arc<dyn SessionLayer>,
    config: SessionConfig,
    tasks: Arc<dyn TaskStore>,
    audit: AuditLog,
    triage: TriageCaptureTable,
    timeout: Duration,
    // Serializes session calls for this agent.
    serial: Mutex<()>,
}

impl SessionExecutor {
    /// Creates an executor for one agent
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: AgentId,
        node_id: NodeId,
        role: AgentRole,
        session: Arc<dyn SessionLayer>,
        config: SessionConfig,
        tasks: Arc<dyn TaskStore>,
        audit: AuditLog,
        triage: TriageCaptureTable,
    ) -> Self {
        Self {
            agent_id,
            node_id,
            role,
            session,
            config,
            tasks,
            audit,
            triage,
            timeout: DEFAULT_SESSION_TIMEOUT,
            serial: Mutex::new(()),
        }
    }

    /// Overrides the session timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_sysadmin_request(&self, flock_type: Option<FlockType>) -> bool {
        self.role == AgentRole::Sysadmin || flock_type == Some(FlockType::SysadminRequest)
    }

    async fn finish_task(&self, record: &mut TaskRecord, state: TaskState, response: Option<String>) {
        record.state = state;
        record.response_text = response;
        record.updated_at = Utc::now();
        if state.is_terminal() {
            record.completed_at = Some(record.updated_at);
        }
        if let Err(e) = self.tasks.update(record).await {
            warn!(task_id = %record.task_id, error = %e, "failed to update task record");
        }
    }

    fn view_from(record: &TaskRecord) -> TaskView {
        TaskView::new(
            record.task_id.to_string(),
            record.context_id.clone(),
            record.state,
        )
    }
}

#[async_trait]
impl AgentExecutor for SessionExecutor {
    #[instrument(skip(self, message), fields(agent_id = %self.agent_id, from = %from))]
    async fn execute(&self, from: AgentId, message: A2aMessage) -> Result<TaskView> {
        let started = Instant::now();
        let text = message.text();
        let meta = message.extract_meta();
        let flock_type = meta.as_ref().map(|m| m.flock_type);
        let message_type = flock_type.map_or_else(|| "general".to_string(), |t| t.to_string());
        let summary: String = text.chars().take(120).collect();

        let mut record = TaskRecord::submitted(
            from,
            self.agent_id.clone(),
            message_type,
            summary,
            serde_json::to_value(&message)?,
        );
        self.tasks.insert(&record).await?;

        let sysadmin_review = self.is_sysadmin_request(flock_type);
        let request_id = sysadmin_review.then(|| Uuid::new_v4().to_string());
        let prompt = match &request_id {
            Some(request_id) => format!("{text}\n\n[request_id: {request_id}]"),
            None => text,
        };

        record.state = TaskState::Working;
        record.updated_at = Utc::now();
        self.tasks.update(&record).await?;

        let session_result = {
            let _serial = self.serial.lock().await;
            tokio::time::timeout(
                self.timeout,
                self.session.send(&self.agent_id, &prompt, &self.config),
            )
            .await
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let home_id = crate::domain_types::HomeId::compose(&self.agent_id, &self.node_id);

        match session_result {
            Ok(Ok(reply)) => {
                let response_text = reply.text.unwrap_or_default();
                let mut view_artifacts = vec![Artifact::text("response", response_text.clone())];

                let mut triage_level = None;
                if let Some(request_id) = &request_id {
                    // The LLM may have called the triage tool during the
                    // reply; absence means WHITE (no triage needed).
                    match self.triage.pop(request_id) {
                        Some(call) => {
                            triage_level = Some(call.level);
                            view_artifacts
                                .push(Artifact::data("triage", serde_json::to_value(&call)?));
                        }
                        None => triage_level = Some(AuditLevel::White),
                    }
                }

                self.finish_task(&mut record, TaskState::Completed, Some(response_text))
                    .await;

                let level = if sysadmin_review {
                    AuditLevel::Yellow
                } else {
                    AuditLevel::Green
                };
                let detail = match triage_level {
                    Some(triage) => format!("{} (triage: {triage})", record.summary),
                    None => record.summary.clone(),
                };
                self.audit
                    .append(
                        AuditEntry::new(self.agent_id.clone(), "a2a-message", level)
                            .with_home(home_id)
                            .with_detail(detail)
                            .with_result("completed")
                            .with_duration_ms(duration_ms),
                    )
                    .await?;

                let mut view = Self::view_from(&record);
                view.artifacts = view_artifacts;
                Ok(view)
            }
            Ok(Err(session_err)) => {
                self.finish_task(&mut record, TaskState::Failed, None).await;
                self.audit
                    .append(
                        AuditEntry::new(self.agent_id.clone(), "a2a-message", AuditLevel::Red)
                            .with_home(home_id)
                            .with_detail(format!("session error: {session_err}"))
                            .with_result("failed")
                            .with_duration_ms(duration_ms),
                    )
                    .await?;
                Ok(Self::view_from(&record)
                    .with_artifact(Artifact::text("error", format!("session error: {session_err}"))))
            }
            Err(_elapsed) => {
                self.finish_task(&mut record, TaskState::Failed, None).await;
                self.audit
                    .append(
                        AuditEntry::new(self.agent_id.clone(), "a2a-message", AuditLevel::Yellow)
                            .with_home(home_id)
                            .with_detail(format!("session timed out after {:?}", self.timeout))
                            .with_result("timeout")
                            .with_duration_ms(duration_ms),
                    )
                    .await?;
                Ok(Self::view_from(&record)
                    .with_artifact(Artifact::text("error", "session timed out")))
            }
        }
    }
}
