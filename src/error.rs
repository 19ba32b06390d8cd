//! Stream error taxonomy.
//!
//! Every failure mode of a streaming call is classified into one of five
//! kinds with a stable string code. Errors never escape to the caller as
//! panics or `Err` returns from `stream_message`; they are normalized
//! into the response shape.

use thiserror::Error;

/// Classified failure of a streaming call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StreamError {
    /// Transport-level failure on dispatch: non-success HTTP status,
    /// missing body, or the request never reached the server.
    #[error("connection failed: {message}")]
    ConnectionFailed { message: String },

    /// A line of the stream was not a valid protocol event. The stream
    /// is considered corrupted and is aborted immediately.
    #[error("invalid stream line: {message}")]
    Parse { message: String },

    /// The producer reported an explicit `error` event.
    #[error("server error: {message}")]
    Server { message: String },

    /// The read loop did not settle within the configured deadline.
    #[error("stream timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    /// Anything not already classified, with the original message kept
    /// for diagnostics.
    #[error("{message}")]
    Unknown { message: String },
}

impl StreamError {
    /// Stable kind code for logging and programmatic handling.
    pub fn kind(&self) -> &'static str {
        match self {
            StreamError::ConnectionFailed { .. } => "connection_failed",
            StreamError::Parse { .. } => "parse_error",
            StreamError::Server { .. } => "server_error",
            StreamError::Timeout { .. } => "stream_timeout",
            StreamError::Unknown { .. } => "unknown_error",
        }
    }

    /// Check if this error is likely transient and worth a caller-side
    /// retry. This layer itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionFailed { .. } | StreamError::Timeout { .. }
        )
    }
}
