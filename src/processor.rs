//! Pure event-to-state transitions for the message accumulator.
//!
//! The processor has no I/O and no knowledge of timers or callbacks: it
//! takes the connection's single message slot and one parsed event, and
//! reports what happened so the read loop can decide whether to notify,
//! finish, or abort.

use crate::models::{MessageState, MessageStatus};
use crate::protocol::StreamEvent;

/// Result of applying one event to the message slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// State changed; subscribers should be notified.
    Updated,
    /// Event carried nothing actionable; no notification is emitted.
    Ignored,
    /// Terminal success; the read loop is done.
    Completed,
    /// Terminal failure reported by the producer; the read loop aborts.
    Failed(String),
}

/// Apply one event to the connection's message slot.
///
/// A connection holds at most one live message: `message_start` replaces
/// whatever was there, implicitly abandoning any prior in-flight message.
/// Events arriving after a terminal state are ignored rather than
/// mutating finalized state.
pub fn apply_event(slot: &mut Option<MessageState>, event: &StreamEvent) -> Outcome {
    match event {
        StreamEvent::MessageStart { id, timestamp } => {
            *slot = Some(MessageState::new(id.clone(), *timestamp));
            Outcome::Updated
        }
        StreamEvent::Content { data, .. } => {
            let Some(state) = slot.as_mut() else {
                return Outcome::Ignored;
            };
            if state.is_terminal() || data.is_empty() {
                return Outcome::Ignored;
            }
            state.content.push_str(data);
            Outcome::Updated
        }
        StreamEvent::Tool {
            tool,
            status,
            timestamp,
            ..
        } => {
            let Some(state) = slot.as_mut() else {
                return Outcome::Ignored;
            };
            if state.is_terminal() {
                return Outcome::Ignored;
            }
            match tool.as_deref() {
                Some(name) if !name.is_empty() => {
                    state.upsert_tool(name, *status, *timestamp);
                    Outcome::Updated
                }
                _ => Outcome::Ignored,
            }
        }
        StreamEvent::MessageComplete { final_content, .. } => {
            let Some(state) = slot.as_mut() else {
                return Outcome::Ignored;
            };
            if state.is_terminal() {
                return Outcome::Ignored;
            }
            state.status = MessageStatus::Complete;
            state.final_content = final_content.clone();
            Outcome::Completed
        }
        StreamEvent::Error { error, .. } => match slot.as_mut() {
            Some(state) if state.is_terminal() => Outcome::Ignored,
            Some(state) => {
                state.status = MessageStatus::Error;
                state.error = Some(error.clone());
                Outcome::Failed(error.clone())
            }
            // An error before message_start still aborts the stream.
            None => Outcome::Failed(error.clone()),
        },
    }
}
