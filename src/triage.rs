//! Triage tool and decision capture table
//!
//! The sysadmin's LLM calls the triage tool with a structured decision;
//! the tool stores it in a process-wide capture table keyed by request id
//! with a 5-minute TTL. The executor pops the capture after the reply; a
//! missing capture means WHITE (no triage needed). Expiration is a memory
//! bound, not a correctness mechanism: the WHITE fallback handles absence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::AuditLevel;

/// How long a captured decision stays retrievable
pub const CAPTURE_TTL: Duration = Duration::from_secs(5 * 60);

/// Structured decision emitted by the triage tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageToolCall {
    /// Request the decision is about
    pub request_id: String,
    /// Classification (GREEN, YELLOW, or RED; WHITE is the absent default)
    pub level: AuditLevel,
    /// Why the sysadmin classified it that way
    pub reasoning: String,
    /// What the sysadmin intends to do
    pub action_plan: String,
    /// Risks the sysadmin identified
    pub risk_factors: Vec<String>,
}

struct Captured {
    call: TriageToolCall,
    stored_at: Instant,
}

/// Process-wide capture table for triage decisions.
///
/// Passed through construction, never a module-level singleton, so tests
/// can instantiate isolated copies.
#[derive(Clone, Default)]
pub struct TriageCaptureTable {
    captures: Arc<DashMap<String, Captured>>,
}

impl TriageCaptureTable {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a decision, returning an acknowledgement string for the tool
    /// reply
    pub fn capture(&self, call: TriageToolCall) -> String {
        let ack = format!("triage decision recorded for {}", call.request_id);
        self.purge_expired();
        self.captures.insert(
            call.request_id.clone(),
            Captured {
                call,
                stored_at: Instant::now(),
            },
        );
        ack
    }

    /// Removes and returns the decision for a request, if present and fresh
    pub fn pop(&self, request_id: &str) -> Option<TriageToolCall> {
        let (_, captured) = self.captures.remove(request_id)?;
        (captured.stored_at.elapsed() < CAPTURE_TTL).then_some(captured.call)
    }

    fn purge_expired(&self) {
        self.captures
            .retain(|_, captured| captured.stored_at.elapsed() < CAPTURE_TTL);
    }

    /// Number of live captures (test and dashboard aid)
    pub fn len(&self) -> usize {
        self.captures.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }
}
