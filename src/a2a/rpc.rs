//! JSON-RPC 2.0 envelope and task wire shapes
//!
//! Typed request/response envelopes shared by the A2A server, the A2A
//! client, and the HTTP migration transport. Standard errors use the
//! reserved codes; domain errors share `-32001` with the stable error
//! code string in `error.data`.

use serde::{Deserialize, Serialize};

use crate::domain::{MessagePart, TaskState};
use crate::error::FlockError;

/// Protocol version string
pub const JSON_RPC_VERSION: &str = "2.0";

/// Reserved and domain error codes
pub mod codes {
    /// Malformed request envelope
    pub const INVALID_REQUEST: i64 = -32600;
    /// Unknown method
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Bad params
    pub const INVALID_PARAMS: i64 = -32602;
    /// Internal failure
    pub const INTERNAL_ERROR: i64 = -32603;
    /// All Flock domain errors (not found, duplicate, unknown peer, ...)
    pub const DOMAIN_ERROR: i64 = -32001;
}

/// One JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Request id echoed back in the response
    #[serde(default)]
    pub id: serde_json::Value,
    /// Method name (e.g. `message/send`, `migration/request`)
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

impl JsonRpcRequest {
    /// Builds a request with a random numeric-ish string id
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id: serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC error payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code
    pub code: i64,
    /// Human-readable message
    pub message: String,
    /// Structured detail (carries the stable Flock error code)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// One JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`
    pub jsonrpc: String,
    /// Echo of the request id
    #[serde(default)]
    pub id: serde_json::Value,
    /// Result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Success response
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response with an explicit code
    pub fn error(id: serde_json::Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Error response derived from a [`FlockError`].
    ///
    /// Peer rejections keep the peer-supplied code (`UNKNOWN_SOURCE`,
    /// `NO_CAPACITY`, ...) so the far side can branch on it.
    pub fn from_flock_error(id: serde_json::Value, err: &FlockError) -> Self {
        let code = match err {
            FlockError::PeerRejected { code, .. } => code.clone(),
            other => other.code().to_string(),
        };
        Self {
            jsonrpc: JSON_RPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code: err.json_rpc_code(),
                message: err.to_string(),
                data: Some(serde_json::json!({ "code": code })),
            }),
        }
    }
}

/// One artifact attached to a task response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Unique artifact id
    pub artifact_id: String,
    /// Artifact name (`"response"`, `"triage"`, `"error"`)
    pub name: String,
    /// Artifact content parts
    pub parts: Vec<MessagePart>,
}

impl Artifact {
    /// Builds a single-text-part artifact
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            artifact_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            parts: vec![MessagePart::Text { text: text.into() }],
        }
    }

    /// Builds a single-data-part artifact
    pub fn data(name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            artifact_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            parts: vec![MessagePart::Data { data }],
        }
    }
}

/// Task status sub-object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    /// Current lifecycle state
    pub state: TaskState,
}

/// The task object a `message/send` returns.
///
/// Remote responses are parsed into this same shape, so callers are
/// topology-agnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    /// Always `"task"`
    pub kind: String,
    /// Task id
    pub id: String,
    /// Conversation context
    pub context_id: String,
    /// Status
    pub status: TaskStatusView,
    /// Attached artifacts
    pub artifacts: Vec<Artifact>,
}

impl TaskView {
    /// Builds a task view
    pub fn new(id: impl Into<String>, context_id: impl Into<String>, state: TaskState) -> Self {
        Self {
            kind: "task".to_string(),
            id: id.into(),
            context_id: context_id.into(),
            status: TaskStatusView { state },
            artifacts: Vec::new(),
        }
    }

    /// Attaches an artifact
    #[must_use]
    pub fn with_artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    /// Text of the first part of the named artifact, if present
    pub fn artifact_text(&self, name: &str) -> Option<&str> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.name == name)
            .and_then(|artifact| {
                artifact.parts.iter().find_map(|part| match part {
                    MessagePart::Text { text } => Some(text.as_str()),
                    MessagePart::Data { .. } => None,
                })
            })
    }

    /// The assistant reply text, if any
    pub fn response_text(&self) -> Option<&str> {
        self.artifact_text("response")
    }
}
