//! Fixed-interval batching of message-state updates.
//!
//! The read loop can process events far faster than a UI wants to be
//! notified. The scheduler coalesces dirty message states and delivers
//! them to registered callbacks at most once per interval: the first
//! enqueue since the last flush arms a single timer, later enqueues in
//! the same window just merge into the pending batch.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::models::MessageState;

/// Callback receiving one flushed batch of message states.
pub type UpdateCallback = Arc<dyn Fn(&[MessageState]) + Send + Sync>;

/// Handle for unregistering a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Inner {
    /// Dirty states since the last flush, deduplicated by message id,
    /// insertion order preserved.
    pending: Vec<MessageState>,
    /// Armed flush timer, if any. One timer per window.
    timer: Option<JoinHandle<()>>,
    /// Registered callbacks in registration order.
    callbacks: Vec<(CallbackId, UpdateCallback)>,
    next_id: u64,
}

/// Coalescing update scheduler.
///
/// Must be used from within a tokio runtime: the flush timer is a
/// spawned task.
pub struct UpdateScheduler {
    interval: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl UpdateScheduler {
    /// Create a scheduler flushing at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            inner: Arc::new(Mutex::new(Inner {
                pending: Vec::new(),
                timer: None,
                callbacks: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a callback; it receives every subsequent flush until
    /// unregistered.
    pub fn register(&self, callback: UpdateCallback) -> CallbackId {
        let mut inner = self.inner.lock().expect("scheduler lock");
        let id = CallbackId(inner.next_id);
        inner.next_id += 1;
        inner.callbacks.push((id, callback));
        id
    }

    /// Remove a previously registered callback. Unknown ids are a no-op.
    pub fn unregister(&self, id: CallbackId) {
        let mut inner = self.inner.lock().expect("scheduler lock");
        inner.callbacks.retain(|(cb_id, _)| *cb_id != id);
    }

    /// Number of currently registered callbacks.
    pub fn callback_count(&self) -> usize {
        self.inner.lock().expect("scheduler lock").callbacks.len()
    }

    /// Mark a message state dirty. The first enqueue since the last flush
    /// arms the timer; subsequent enqueues within the window replace the
    /// pending snapshot for the same message id in place.
    pub fn enqueue(&self, state: &MessageState) {
        let mut inner = self.inner.lock().expect("scheduler lock");
        match inner.pending.iter_mut().find(|s| s.id == state.id) {
            Some(existing) => *existing = state.clone(),
            None => inner.pending.push(state.clone()),
        }

        if inner.timer.is_none() {
            let shared = Arc::clone(&self.inner);
            let interval = self.interval;
            inner.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                Self::deliver(&shared);
            }));
        }
    }

    /// Flush the pending batch immediately, without waiting for the
    /// timer. Used when a stream settles so its tail states reach
    /// callbacks that are about to be unregistered.
    pub fn flush_now(&self) {
        if let Some(timer) = {
            let mut inner = self.inner.lock().expect("scheduler lock");
            inner.timer.take()
        } {
            timer.abort();
        }
        Self::deliver(&self.inner);
    }

    /// Drop the pending batch, cancel the armed timer, and remove every
    /// callback. Used on full teardown.
    pub fn clear(&self) {
        let timer = {
            let mut inner = self.inner.lock().expect("scheduler lock");
            inner.pending.clear();
            inner.callbacks.clear();
            inner.timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Deliver the whole pending batch once to every callback, then reset
    /// batch and timer so a new window can begin.
    fn deliver(shared: &Arc<Mutex<Inner>>) {
        let (batch, callbacks) = {
            let mut inner = shared.lock().expect("scheduler lock");
            inner.timer = None;
            if inner.pending.is_empty() {
                return;
            }
            let batch = std::mem::take(&mut inner.pending);
            let callbacks: Vec<UpdateCallback> = inner
                .callbacks
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();
            (batch, callbacks)
        };

        // Callbacks run outside the lock; a panicking callback is logged
        // and must not starve the others.
        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(&batch))).is_err() {
                tracing::warn!(batch_len = batch.len(), "update callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().expect("scheduler lock");
        f.debug_struct("UpdateScheduler")
            .field("interval", &self.interval)
            .field("pending", &inner.pending.len())
            .field("callbacks", &inner.callbacks.len())
            .field("timer_armed", &inner.timer.is_some())
            .finish()
    }
}

/// Batches observed by a test callback, keyed by nothing - just appended.
#[cfg(test)]
type SeenBatches = Arc<Mutex<Vec<Vec<MessageState>>>>;
