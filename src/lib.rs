//! pinstream - streaming chat client for the pinboard assistant backend.
//!
//! The backend narrates assistant turns as a JSON-lines stream over a
//! chunked HTTP response: token deltas and tool-execution updates merged
//! into one strictly ordered sequence of events. This crate consumes
//! that stream: it decodes lines incrementally across arbitrary chunk
//! boundaries, folds events into a message accumulator, batches state
//! notifications on a fixed cadence so consumers aren't rendered faster
//! than they can usefully process, and normalizes every failure mode
//! into a structured response.
//!
//! Entry point is [`StreamManager::stream_message`].

pub mod decoder;
pub mod error;
pub mod manager;
pub mod models;
pub mod processor;
pub mod protocol;
pub mod scheduler;
pub mod stats;

pub use error::StreamError;
pub use manager::{HookId, LifecycleEvent, LifecycleHook, StreamConfig, StreamManager};
pub use models::{ChatStreamResponse, MessageState, MessageStatus, StreamRequest, ToolExecution};
pub use protocol::{StreamEvent, ToolStatus};
pub use scheduler::{CallbackId, UpdateCallback, UpdateScheduler};
pub use stats::StreamStats;
