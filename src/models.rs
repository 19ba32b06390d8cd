//! Request, response, and message accumulator types.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::protocol::ToolStatus;

/// Request payload for the streaming chat endpoint.
///
/// The backend is a JS service, so field names are camelCase on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// The user message to send
    pub message: String,
    /// Conversation to continue - None starts a new one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// Originating user, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl StreamRequest {
    /// Create a request for a new conversation.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            user_id: None,
        }
    }

    /// Create a request continuing an existing conversation.
    pub fn with_conversation(
        message: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            conversation_id: Some(conversation_id.into()),
            user_id: None,
        }
    }

    /// Attach a user id to the request.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Lifecycle status of a message accumulator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Events are still arriving
    #[default]
    Streaming,
    /// Terminated by `message_complete`
    Complete,
    /// Terminated by an `error` event
    Error,
}

/// One tool invocation's latest known state.
///
/// Ephemeral: overwritten in place on each update for the same tool name,
/// never deleted mid-stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolExecution {
    /// Tool name, the upsert key
    pub name: String,
    /// Most recent status reported by the producer
    pub status: ToolStatus,
    /// Unix timestamp in milliseconds of the latest update
    pub timestamp: u64,
}

/// Accumulated state of one in-flight message.
///
/// A connection holds at most one of these at a time; a new
/// `message_start` replaces any prior state without error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageState {
    /// Message id from `message_start`
    pub id: String,
    /// Concatenation of every `content` fragment, in arrival order
    pub content: String,
    /// Tool executions in first-seen order, upserted by name
    pub tools: Vec<ToolExecution>,
    /// Current lifecycle status
    pub status: MessageStatus,
    /// Producer timestamp from `message_start` (epoch ms)
    pub start_time: u64,
    /// Authoritative final text from `message_complete`, if any
    pub final_content: Option<String>,
    /// Error message from a terminal `error` event, if any
    pub error: Option<String>,
}

impl MessageState {
    /// Fresh accumulator for a newly started message.
    pub fn new(id: impl Into<String>, start_time: u64) -> Self {
        Self {
            id: id.into(),
            content: String::new(),
            tools: Vec::new(),
            status: MessageStatus::Streaming,
            start_time,
            final_content: None,
            error: None,
        }
    }

    /// Whether a terminal event has already been applied.
    pub fn is_terminal(&self) -> bool {
        self.status != MessageStatus::Streaming
    }

    /// Upsert a tool entry by exact name match. First insertion fixes the
    /// display position; later updates replace status and timestamp.
    pub fn upsert_tool(&mut self, name: &str, status: ToolStatus, timestamp: u64) {
        match self.tools.iter_mut().find(|t| t.name == name) {
            Some(existing) => {
                existing.status = status;
                existing.timestamp = timestamp;
            }
            None => self.tools.push(ToolExecution {
                name: name.to_string(),
                status,
                timestamp,
            }),
        }
    }

    /// The text a completed message resolves to: the authoritative
    /// `final_content` when present, otherwise the accumulated fragments.
    pub fn resolved_content(&self) -> String {
        self.final_content
            .clone()
            .unwrap_or_else(|| self.content.clone())
    }
}

/// Normalized result of a streaming call.
///
/// `stream_message` never returns `Err`; every failure mode lands here
/// with `success: false` and a classified error.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatStreamResponse {
    /// Whether the stream terminated successfully
    pub success: bool,
    /// Final message text on success
    pub final_content: Option<String>,
    /// Message id, when one was ever announced (empty otherwise)
    pub message_id: String,
    /// Tool executions observed during the stream
    pub tools: Vec<ToolExecution>,
    /// Classified failure on error paths
    pub error: Option<StreamError>,
}

impl ChatStreamResponse {
    /// Successful completion from a settled message state.
    pub(crate) fn completed(state: MessageState) -> Self {
        let final_content = state.resolved_content();
        Self {
            success: true,
            final_content: Some(final_content),
            message_id: state.id,
            tools: state.tools,
            error: None,
        }
    }

    /// Normalized failure.
    pub(crate) fn failed(error: StreamError, message_id: String) -> Self {
        Self {
            success: false,
            final_content: None,
            message_id,
            tools: Vec::new(),
            error: Some(error),
        }
    }
}
