//! Stream session manager: the public entry point for streaming calls.
//!
//! `StreamManager` owns the HTTP client, the registry of in-flight
//! connections, the update scheduler, lifecycle hooks, and running stats.
//! It is an explicit, constructible instance: applications that want a
//! singleton create one at their composition root and call `destroy()`
//! on teardown.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::decoder::LineDecoder;
use crate::error::StreamError;
use crate::models::{ChatStreamResponse, MessageState, StreamRequest};
use crate::processor::{apply_event, Outcome};
use crate::protocol::StreamEvent;
use crate::scheduler::{UpdateCallback, UpdateScheduler};
use crate::stats::StreamStats;

/// Tuning knobs for the manager.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Batching interval for update callbacks (one animation frame)
    pub update_interval: Duration,
    /// Deadline for the whole read loop
    pub timeout: Duration,
    /// Emit per-event debug logs
    pub debug: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(16),
            timeout: Duration::from_secs(300),
            debug: false,
        }
    }
}

/// Observability events emitted to registered lifecycle hooks.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// A streaming call was dispatched.
    Start {
        connection_id: String,
        message: String,
    },
    /// One protocol event was processed, with the resulting state.
    Progress {
        connection_id: String,
        event: StreamEvent,
        state: MessageState,
    },
    /// The call settled successfully.
    Complete {
        connection_id: String,
        state: MessageState,
    },
    /// The call settled with a failure.
    Error {
        connection_id: String,
        error: StreamError,
    },
}

impl LifecycleEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Start { .. } => "start",
            LifecycleEvent::Progress { .. } => "progress",
            LifecycleEvent::Complete { .. } => "complete",
            LifecycleEvent::Error { .. } => "error",
        }
    }
}

/// Observer invoked for every lifecycle event. Panics are caught and
/// logged; a hook cannot corrupt the stream.
pub type LifecycleHook = Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;

/// Handle for removing a lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// Per-connection bookkeeping while a call is in flight.
struct ConnectionEntry {
    /// Message id once announced by `message_start`
    message_id: Option<String>,
    /// Signal that forces the read loop to bail (used by `destroy`)
    cancel: Arc<Notify>,
}

/// Whether the read loop should keep going after a processed line.
enum LineOutcome {
    Continue,
    Finished,
}

/// Client for the pinboard chat streaming API.
pub struct StreamManager {
    base_url: String,
    http: Client,
    config: StreamConfig,
    scheduler: UpdateScheduler,
    connections: Mutex<HashMap<String, ConnectionEntry>>,
    hooks: Mutex<Vec<(HookId, LifecycleHook)>>,
    next_hook_id: AtomicU64,
    stats: Mutex<StreamStats>,
}

impl StreamManager {
    /// Create a manager with default configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_config(base_url, StreamConfig::default())
    }

    /// Create a manager with explicit configuration.
    pub fn with_config(base_url: impl Into<String>, config: StreamConfig) -> Self {
        let scheduler = UpdateScheduler::new(config.update_interval);
        Self {
            base_url: base_url.into(),
            http: Client::new(),
            config,
            scheduler,
            connections: Mutex::new(HashMap::new()),
            hooks: Mutex::new(Vec::new()),
            next_hook_id: AtomicU64::new(0),
            stats: Mutex::new(StreamStats::default()),
        }
    }

    /// Stream one chat message and resolve with a normalized response.
    ///
    /// Never returns an error: transport failures, malformed lines,
    /// producer-reported errors, and timeouts all land in the response
    /// with `success: false` and a classified [`StreamError`]. The
    /// optional `on_update` callback receives batched state snapshots on
    /// the configured interval for the duration of this call.
    pub async fn stream_message(
        &self,
        request: &StreamRequest,
        on_update: Option<UpdateCallback>,
    ) -> ChatStreamResponse {
        let connection_id = next_connection_id();
        let started = Instant::now();
        let cancel = Arc::new(Notify::new());

        // Registration happens before the read loop so that teardown and
        // observability can always see the in-flight call.
        self.connections.lock().expect("connections lock").insert(
            connection_id.clone(),
            ConnectionEntry {
                message_id: None,
                cancel: Arc::clone(&cancel),
            },
        );
        let callback_id = on_update.map(|cb| self.scheduler.register(cb));

        self.emit_hook(&LifecycleEvent::Start {
            connection_id: connection_id.clone(),
            message: request.message.clone(),
        });

        let timeout = self.config.timeout;
        // The slot outlives the read loop so that state accumulated
        // before a failure (or a timed-out future drop) is still
        // visible at settlement.
        let mut slot: Option<MessageState> = None;
        let result = match tokio::time::timeout(
            timeout,
            self.run_stream(&connection_id, request, &cancel, &mut slot),
        )
        .await
        {
            Ok(settled) => settled,
            // Losing the race drops the read-loop future, which releases
            // the response body and its reader.
            Err(_) => Err(StreamError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        // Cleanup runs on every exit path: deregister the connection,
        // flush any tail states, then drop the per-call callback.
        let message_id = self
            .connections
            .lock()
            .expect("connections lock")
            .remove(&connection_id)
            .and_then(|entry| entry.message_id)
            .unwrap_or_default();
        if let Some(id) = callback_id {
            self.scheduler.flush_now();
            self.scheduler.unregister(id);
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        // Tool executions count whether or not the call succeeds; a
        // failure response carries no tools, so read the count from the
        // settled state, not the response.
        let tool_count = match &result {
            Ok(state) => state.tools.len() as u64,
            Err(_) => slot.as_ref().map_or(0, |state| state.tools.len()) as u64,
        };
        let response = match result {
            Ok(state) => {
                self.emit_hook(&LifecycleEvent::Complete {
                    connection_id: connection_id.clone(),
                    state: state.clone(),
                });
                ChatStreamResponse::completed(state)
            }
            Err(error) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    kind = error.kind(),
                    %error,
                    "stream failed"
                );
                self.emit_hook(&LifecycleEvent::Error {
                    connection_id: connection_id.clone(),
                    error: error.clone(),
                });
                ChatStreamResponse::failed(error, message_id)
            }
        };

        self.stats
            .lock()
            .expect("stats lock")
            .record(duration_ms, response.success, tool_count);
        response
    }

    /// Check if the backend is healthy and reachable.
    pub async fn health_check(&self) -> Result<bool, StreamError> {
        let url = format!("{}/api/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| StreamError::ConnectionFailed {
                message: e.to_string(),
            })?;
        Ok(response.status().is_success())
    }

    /// Register an observability hook. Returns a handle for removal.
    pub fn add_lifecycle_hook(&self, hook: LifecycleHook) -> HookId {
        let id = HookId(self.next_hook_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().expect("hooks lock").push((id, hook));
        id
    }

    /// Remove a lifecycle hook. Unknown ids are a no-op.
    pub fn remove_lifecycle_hook(&self, id: HookId) {
        self.hooks
            .lock()
            .expect("hooks lock")
            .retain(|(hook_id, _)| *hook_id != id);
    }

    /// Snapshot of the running aggregates.
    pub fn get_stats(&self) -> StreamStats {
        *self.stats.lock().expect("stats lock")
    }

    /// Reset the running aggregates.
    pub fn reset_stats(&self) {
        self.stats.lock().expect("stats lock").reset();
    }

    /// Number of in-flight streaming calls.
    pub fn active_connections(&self) -> usize {
        self.connections.lock().expect("connections lock").len()
    }

    /// Full teardown for process or page shutdown: cancels every
    /// in-flight read loop, drops the pending batch and its timer, and
    /// clears callbacks and hooks. Not a per-request cancellation API.
    pub fn destroy(&self) {
        {
            let mut connections = self.connections.lock().expect("connections lock");
            for entry in connections.values() {
                entry.cancel.notify_one();
            }
            connections.clear();
        }
        self.scheduler.clear();
        self.hooks.lock().expect("hooks lock").clear();
    }

    /// Drive one connection's read loop to a settled message state.
    async fn run_stream(
        &self,
        connection_id: &str,
        request: &StreamRequest,
        cancel: &Notify,
        slot: &mut Option<MessageState>,
    ) -> Result<MessageState, StreamError> {
        let url = format!("{}/api/chat/stream", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("Accept", "application/x-ndjson")
            .json(request)
            .send()
            .await
            .map_err(|e| StreamError::ConnectionFailed {
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(StreamError::ConnectionFailed {
                message: format!("server returned status {}", response.status()),
            });
        }

        let mut body = Box::pin(response.bytes_stream());
        let mut decoder = LineDecoder::new();

        loop {
            let chunk = tokio::select! {
                _ = cancel.notified() => {
                    return Err(StreamError::ConnectionFailed {
                        message: "connection closed by shutdown".to_string(),
                    });
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    let lines = decoder.push(&bytes).map_err(|e| StreamError::Parse {
                        message: e.to_string(),
                    })?;
                    for line in lines {
                        match self.process_line(connection_id, &line, slot)? {
                            LineOutcome::Continue => {}
                            LineOutcome::Finished => {
                                return slot.take().ok_or_else(|| StreamError::Unknown {
                                    message: "stream completed without message state".to_string(),
                                });
                            }
                        }
                    }
                }
                Some(Err(e)) => {
                    return Err(StreamError::Unknown {
                        message: format!("stream read failed: {}", e),
                    });
                }
                None => break,
            }
        }

        // Socket closed without a terminal event. A trailing fragment
        // that never got its newline is dropped, not parsed.
        if let Some(remainder) = decoder.finish() {
            tracing::debug!(
                connection_id = %connection_id,
                discarded_bytes = remainder.len(),
                "discarding unterminated trailing data"
            );
        }
        match slot.take() {
            // Best-effort: accept a partial accumulation as the result.
            Some(state) if !state.content.is_empty() => Ok(state),
            other => {
                *slot = other;
                Err(StreamError::Unknown {
                    message: "Stream ended without content".to_string(),
                })
            }
        }
    }

    /// Parse and apply a single line; emit progress and enqueue updates.
    fn process_line(
        &self,
        connection_id: &str,
        line: &str,
        slot: &mut Option<MessageState>,
    ) -> Result<LineOutcome, StreamError> {
        let event = StreamEvent::parse(line).map_err(|e| StreamError::Parse {
            message: e.to_string(),
        })?;
        if self.config.debug {
            tracing::debug!(
                connection_id = %connection_id,
                event = event.event_type_name(),
                "stream event"
            );
        }

        match apply_event(slot, &event) {
            Outcome::Ignored => Ok(LineOutcome::Continue),
            Outcome::Updated => {
                if matches!(event, StreamEvent::MessageStart { .. }) {
                    if let Some(entry) = self
                        .connections
                        .lock()
                        .expect("connections lock")
                        .get_mut(connection_id)
                    {
                        entry.message_id = Some(event.message_id().to_string());
                    }
                }
                self.notify_progress(connection_id, &event, slot);
                Ok(LineOutcome::Continue)
            }
            Outcome::Completed => {
                self.notify_progress(connection_id, &event, slot);
                Ok(LineOutcome::Finished)
            }
            Outcome::Failed(message) => Err(StreamError::Server { message }),
        }
    }

    /// Enqueue the current state for the next flush and emit a progress
    /// hook carrying the event and resulting state.
    fn notify_progress(
        &self,
        connection_id: &str,
        event: &StreamEvent,
        slot: &Option<MessageState>,
    ) {
        if let Some(state) = slot.as_ref() {
            self.scheduler.enqueue(state);
            self.emit_hook(&LifecycleEvent::Progress {
                connection_id: connection_id.to_string(),
                event: event.clone(),
                state: state.clone(),
            });
        }
    }

    /// Invoke every registered hook, isolating panics per hook.
    fn emit_hook(&self, event: &LifecycleEvent) {
        let hooks: Vec<LifecycleHook> = self
            .hooks
            .lock()
            .expect("hooks lock")
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect();
        for hook in hooks {
            if catch_unwind(AssertUnwindSafe(|| hook(event))).is_err() {
                tracing::warn!(event = event.name(), "lifecycle hook panicked");
            }
        }
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

/// Client-local correlation key: epoch millis plus a random suffix.
/// Unique enough for correlating logs and registry entries; not a
/// security token.
fn next_connection_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("conn-{}-{}", Utc::now().timestamp_millis(), &uuid[..8])
}
