use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{LogEntry, NodeId, NodeStatus},
    error::IgnoredFrame,
};

pub const EVENT_TYPE_FIELD: &str = "event_type";

/// Events emitted by the job engine for one run, discriminated by `event_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    NodeStart {
        node_id: NodeId,
        node_type: String,
        #[serde(default)]
        node_label: Option<String>,
    },
    NodeComplete {
        node_id: NodeId,
        node_type: String,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    NodeError {
        node_id: NodeId,
        node_type: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        duration_ms: Option<f64>,
    },
    ExecutionComplete {},
}

impl ExecutionEvent {
    pub const KNOWN_TYPES: [&'static str; 4] = [
        "node_start",
        "node_complete",
        "node_error",
        "execution_complete",
    ];

    pub fn is_known_type(event_type: &str) -> bool {
        Self::KNOWN_TYPES.contains(&event_type)
    }

    /// Log entry for node-level events; `None` for run-level events.
    pub fn to_log_entry(&self, received_at: DateTime<Utc>) -> Option<LogEntry> {
        match self {
            Self::NodeStart {
                node_id,
                node_type,
                node_label,
            } => Some(LogEntry {
                node_id: node_id.clone(),
                node_type: node_type.clone(),
                node_label: node_label.clone(),
                status: NodeStatus::Running,
                duration_ms: None,
                error: None,
                timestamp: received_at,
            }),
            Self::NodeComplete {
                node_id,
                node_type,
                duration_ms,
            } => Some(LogEntry {
                node_id: node_id.clone(),
                node_type: node_type.clone(),
                node_label: None,
                status: NodeStatus::Success,
                duration_ms: *duration_ms,
                error: None,
                timestamp: received_at,
            }),
            Self::NodeError {
                node_id,
                node_type,
                error,
                duration_ms,
            } => Some(LogEntry {
                node_id: node_id.clone(),
                node_type: node_type.clone(),
                node_label: None,
                status: NodeStatus::Error,
                duration_ms: *duration_ms,
                error: error.clone(),
                timestamp: received_at,
            }),
            Self::ExecutionComplete {} => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Event(ExecutionEvent),
    Ignored(IgnoredFrame),
}

/// Decodes one inbound text frame. Never fails: anything that is not a
/// recognizable event comes back as [`DecodedFrame::Ignored`].
pub fn decode_frame(raw: &str) -> DecodedFrame {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(value) => value,
        Err(err) => return DecodedFrame::Ignored(IgnoredFrame::malformed(err)),
    };
    let Some(event_type) = value
        .get(EVENT_TYPE_FIELD)
        .and_then(Value::as_str)
        .map(str::to_owned)
    else {
        return DecodedFrame::Ignored(IgnoredFrame::MissingEventType);
    };
    if !ExecutionEvent::is_known_type(&event_type) {
        return DecodedFrame::Ignored(IgnoredFrame::UnknownEventType(event_type));
    }

    match serde_json::from_value::<ExecutionEvent>(value) {
        Ok(event) => DecodedFrame::Event(event),
        Err(err) => DecodedFrame::Ignored(IgnoredFrame::malformed(err)),
    }
}

/// Frames the client sends upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
}

impl ClientFrame {
    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
