//! LLM session layer boundary
//!
//! The executor sees only the [`SessionLayer`] trait: send a prompt for an
//! agent, get text and events back. Per-agent state (history, model,
//! tools) lives behind the trait; history is trimmed oldest-first once it
//! exceeds `max_context_messages`.
//!
//! The crate ships [`EchoSession`], a provider-free implementation that
//! replies with the inbound text. It keeps a node runnable and testable
//! without credentials; production deployments plug a real provider in at
//! boot.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain_types::AgentId;
use crate::error::Result;

/// Per-agent session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Model identifier
    pub model: String,
    /// System prompt prepended to the conversation
    pub system_prompt: String,
    /// Tool names exposed to the session
    pub tools: Vec<String>,
    /// Provider-specific reasoning depth, if supported
    pub thinking_level: Option<String>,
    /// History cap; oldest entries are dropped beyond this
    pub max_context_messages: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            system_prompt: String::new(),
            tools: Vec::new(),
            thinking_level: None,
            max_context_messages: 100,
        }
    }
}

/// One structured event emitted during a session call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Event kind (e.g. `"tool-call"`)
    pub kind: String,
    /// Event payload
    pub data: serde_json::Value,
}

/// Reply from one session call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReply {
    /// Assistant text, if the session produced any
    pub text: Option<String>,
    /// Structured events emitted along the way
    pub events: Vec<SessionEvent>,
}

/// The LLM session collaborator the executor talks to
#[async_trait]
pub trait SessionLayer: Send + Sync {
    /// Sends one message into the agent's session and awaits the reply
    async fn send(
        &self,
        agent_id: &AgentId,
        message: &str,
        config: &SessionConfig,
    ) -> Result<SessionReply>;
}

/// Provider-free session that echoes the inbound text.
///
/// An optional signature is prepended to every reply so multi-node tests
/// can tell which node's session answered.
#[derive(Clone, Default)]
pub struct EchoSession {
    signature: Option<String>,
    histories: Arc<DashMap<AgentId, Vec<String>>>,
}

impl EchoSession {
    /// Creates an unsigned echo session
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an echo session that prefixes replies with `[signature]`
    pub fn with_signature(signature: impl Into<String>) -> Self {
        Self {
            signature: Some(signature.into()),
            histories: Arc::new(DashMap::new()),
        }
    }

    /// The retained history for an agent (test aid)
    pub fn history(&self, agent_id: &AgentId) -> Vec<String> {
        self.histories
            .get(agent_id)
            .map(|h| h.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionLayer for EchoSession {
    async fn send(
        &self,
        agent_id: &AgentId,
        message: &str,
        config: &SessionConfig,
    ) -> Result<SessionReply> {
        let mut history = self.histories.entry(agent_id.clone()).or_default();
        history.push(message.to_string());
        // Oldest-first trim, preserving order of what remains.
        if history.len() > config.max_context_messages {
            let excess = history.len() - config.max_context_messages;
            history.drain(..excess);
        }
        drop(history);

        let text = match &self.signature {
            Some(signature) => format!("[{signature}] {message}"),
            None => message.to_string(),
        };
        Ok(SessionReply {
            text: Some(text),
            events: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> AgentId {
        AgentId::try_new("worker-1".to_string()).unwrap()
    }

    #[tokio::test]
    async fn test_should_echo_text_when_sending_message() {
        let session = EchoSession::new();
        let reply = session
            .send(&agent(), "hello there", &SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(reply.text.as_deref(), Some("hello there"));
    }

    #[tokio::test]
    async fn test_should_prefix_signature_when_configured() {
        let session = EchoSession::with_signature("worker-node-2");
        let reply = session
            .send(&agent(), "status?", &SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(reply.text.as_deref(), Some("[worker-node-2] status?"));
    }

    #[tokio::test]
    async fn test_should_drop_oldest_when_history_exceeds_cap() {
        let session = EchoSession::new();
        let config = SessionConfig {
            max_context_messages: 3,
            ..SessionConfig::default()
        };
        for i in 1..=5 {
            session
                .send(&agent(), &format!("msg {i}"), &config)
                .await
                .unwrap();
        }
        let history = session.history(&agent());
        assert_eq!(history, vec!["msg 3", "msg 4", "msg 5"]);
    }

    #[tokio::test]
    async fn test_should_keep_histories_separate_when_agents_differ() {
        let session = EchoSession::new();
        let other = AgentId::try_new("worker-2".to_string()).unwrap();
        session
            .send(&agent(), "for one", &SessionConfig::default())
            .await
            .unwrap();
        session
            .send(&other, "for two", &SessionConfig::default())
            .await
            .unwrap();
        assert_eq!(session.history(&agent()), vec!["for one"]);
        assert_eq!(session.history(&other), vec!["for two"]);
    }
}
