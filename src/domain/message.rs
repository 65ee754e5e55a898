//! A2A message envelope and Flock metadata
//!
//! A message is an ordered list of parts. Text parts carry user-visible
//! content; data parts carry structured payloads, optionally including a
//! `flockMeta` sub-object with typed routing metadata. `build` followed by
//! `extract` is lossless for the metadata.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The calling side
    User,
    /// The agent side
    Agent,
}

/// Typed Flock message kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlockType {
    /// Work assignment
    Task,
    /// Review request
    Review,
    /// Informational
    Info,
    /// Progress report
    StatusUpdate,
    /// Untyped conversation
    General,
    /// Orchestrator-to-worker assignment
    WorkerTask,
    /// Privileged request to the sysadmin
    SysadminRequest,
    /// Triage verdict broadcast
    TriageDecision,
}

impl fmt::Display for FlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Task => "task",
            Self::Review => "review",
            Self::Info => "info",
            Self::StatusUpdate => "status-update",
            Self::General => "general",
            Self::WorkerTask => "worker-task",
            Self::SysadminRequest => "sysadmin-request",
            Self::TriageDecision => "triage-decision",
        };
        write!(f, "{s}")
    }
}

/// Message urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    /// Can wait
    Low,
    /// Default
    #[default]
    Normal,
    /// Jump the queue
    High,
}

/// Structured envelope metadata attached as a data part
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlockMeta {
    /// Message kind
    pub flock_type: FlockType,
    /// Urgency
    #[serde(default)]
    pub urgency: Urgency,
    /// Project the message belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Sending home, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_home: Option<String>,
    /// Forward-compatible extra keys (ordered for stable round-trips)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl FlockMeta {
    /// Minimal metadata of the given kind
    pub fn of_type(flock_type: FlockType) -> Self {
        Self {
            flock_type,
            urgency: Urgency::default(),
            project: None,
            from_home: None,
            extra: BTreeMap::new(),
        }
    }
}

/// One part of an A2A message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessagePart {
    /// User-visible content
    Text {
        /// The text itself
        text: String,
    },
    /// Structured payload, optionally carrying `flockMeta`
    Data {
        /// Arbitrary JSON payload
        data: serde_json::Value,
    },
}

/// A2A message envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    /// Who authored the message
    pub role: MessageRole,
    /// Unique message id
    pub message_id: String,
    /// Ordered parts
    pub parts: Vec<MessagePart>,
}

impl A2aMessage {
    /// Builds a message from text plus optional metadata and extra data.
    ///
    /// Text alone builds a 1-part message; presence of metadata or extra
    /// data appends one data part carrying both.
    pub fn build(
        text: impl Into<String>,
        meta: Option<&FlockMeta>,
        extra: Option<serde_json::Value>,
    ) -> Self {
        let mut parts = vec![MessagePart::Text { text: text.into() }];
        if meta.is_some() || extra.is_some() {
            let mut data = match extra {
                Some(serde_json::Value::Object(map)) => serde_json::Value::Object(map),
                Some(other) => serde_json::json!({ "payload": other }),
                None => serde_json::json!({}),
            };
            if let Some(meta) = meta {
                if let (serde_json::Value::Object(map), Ok(meta_value)) =
                    (&mut data, serde_json::to_value(meta))
                {
                    map.insert("flockMeta".to_string(), meta_value);
                }
            }
            parts.push(MessagePart::Data { data });
        }
        Self {
            role: MessageRole::User,
            message_id: Uuid::new_v4().to_string(),
            parts,
        }
    }

    /// Concatenated text of all text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text { text } => Some(text.as_str()),
                MessagePart::Data { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Extracts Flock metadata.
    ///
    /// The first data part bearing a well-formed `flockMeta` object wins;
    /// malformed metadata in an earlier part does not mask a later one.
    pub fn extract_meta(&self) -> Option<FlockMeta> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::Data { data } => data
                .get("flockMeta")
                .and_then(|raw| serde_json::from_value(raw.clone()).ok()),
            MessagePart::Text { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_build_single_part_when_text_only() {
        let msg = A2aMessage::build("hello", None, None);
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.text(), "hello");
        assert!(msg.extract_meta().is_none());
    }

    #[test]
    fn test_should_append_data_part_when_meta_is_present() {
        let meta = FlockMeta::of_type(FlockType::Task);
        let msg = A2aMessage::build("do it", Some(&meta), None);
        assert_eq!(msg.parts.len(), 2);
    }

    #[test]
    fn test_should_round_trip_meta_when_building_then_extracting() {
        let mut meta = FlockMeta::of_type(FlockType::SysadminRequest);
        meta.urgency = Urgency::High;
        meta.project = Some("atlas".to_string());
        meta.from_home = Some("worker-1@node-a".to_string());
        meta.extra
            .insert("ticket".to_string(), serde_json::json!("T-99"));

        let msg = A2aMessage::build("restart the db", Some(&meta), None);
        let extracted = msg.extract_meta().expect("meta should survive");
        assert_eq!(extracted, meta);
    }

    #[test]
    fn test_should_prefer_first_meta_bearing_part_when_several_exist() {
        let first = FlockMeta::of_type(FlockType::Info);
        let second = FlockMeta::of_type(FlockType::Review);
        let mut msg = A2aMessage::build("x", Some(&first), None);
        msg.parts.push(MessagePart::Data {
            data: serde_json::json!({ "flockMeta": serde_json::to_value(&second).unwrap() }),
        });
        assert_eq!(msg.extract_meta().unwrap().flock_type, FlockType::Info);
    }

    #[test]
    fn test_should_keep_extra_payload_when_not_an_object() {
        let msg = A2aMessage::build("x", None, Some(serde_json::json!([1, 2, 3])));
        match &msg.parts[1] {
            MessagePart::Data { data } => {
                assert_eq!(data["payload"], serde_json::json!([1, 2, 3]));
            }
            MessagePart::Text { .. } => panic!("expected data part"),
        }
    }

    #[test]
    fn test_should_serialize_kind_tag_when_encoding_parts() {
        let msg = A2aMessage::build("hi", None, None);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["parts"][0]["kind"], "text");
        assert_eq!(value["messageId"], serde_json::json!(msg.message_id));
    }
}
