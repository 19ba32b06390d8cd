//! Wire protocol for the pinboard chat stream.
//!
//! The backend streams one JSON object per line over a chunked HTTP
//! response body. Each line is a tagged event; `message_complete` and
//! `error` are terminal and exactly one of them ends a message.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a tool invocation.
///
/// The producer's status vocabulary is open-ended, so anything we don't
/// recognize maps to `Unknown` rather than failing the whole stream.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    /// Tool is currently executing
    Running,
    /// Tool finished successfully
    Complete,
    /// Tool execution failed
    Error,
    /// Status string not recognized by this client version
    #[serde(other)]
    Unknown,
}

/// A single parsed line of the stream protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Begins a new message; any prior in-flight message on the
    /// connection is abandoned.
    MessageStart {
        id: String,
        /// Unix timestamp in milliseconds
        timestamp: u64,
    },
    /// Incremental text fragment appended to the message body.
    Content {
        id: String,
        #[serde(default)]
        data: String,
    },
    /// Tool invocation lifecycle update, keyed by tool name. A later
    /// event for the same name replaces the prior entry.
    Tool {
        id: String,
        #[serde(default)]
        tool: Option<String>,
        status: ToolStatus,
        #[serde(default)]
        timestamp: u64,
    },
    /// Terminal success. Carries the authoritative final text, which may
    /// differ from the accumulated content fragments.
    MessageComplete {
        id: String,
        #[serde(default)]
        final_content: Option<String>,
    },
    /// Terminal failure reported by the producer.
    Error { id: String, error: String },
}

impl StreamEvent {
    /// Parse a single protocol line.
    ///
    /// Any line that is not valid JSON, or whose `type` discriminant is
    /// not recognized, is an error. The caller treats that as fatal for
    /// the whole stream; malformed lines are never skipped.
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }

    /// The message id this event belongs to.
    pub fn message_id(&self) -> &str {
        match self {
            StreamEvent::MessageStart { id, .. }
            | StreamEvent::Content { id, .. }
            | StreamEvent::Tool { id, .. }
            | StreamEvent::MessageComplete { id, .. }
            | StreamEvent::Error { id, .. } => id,
        }
    }

    /// Returns the event type name as a string for logging purposes.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Tool { .. } => "tool",
            StreamEvent::MessageComplete { .. } => "message_complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Whether this event ends the message's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::MessageComplete { .. } | StreamEvent::Error { .. }
        )
    }
}
