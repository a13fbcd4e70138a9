//! Deferred work queues for the later regions of a time slot.

use parking_lot::Mutex;
use tracing::trace;

type Deferred = Box<dyn FnOnce() + Send + 'static>;

/// Delayed (non-blocking) assignments.
///
/// Assignments scheduled while the active region runs are applied together
/// once it has settled, in the order they were scheduled.
#[derive(Default)]
pub struct NbaQueue {
    pending: Mutex<Vec<Deferred>>,
}

impl NbaQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an assignment.
    pub fn schedule(&self, assign: impl FnOnce() + Send + 'static) {
        self.pending.lock().push(Box::new(assign));
    }

    /// Applies every assignment scheduled so far. Assignments scheduled while
    /// applying wait for the next call. Returns the number applied.
    pub fn apply_all(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        let count = batch.len();
        if count > 0 {
            trace!(count, "applying delayed assignments");
        }
        for assign in batch {
            assign();
        }
        count
    }

    /// Returns `true` if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops every scheduled assignment without applying it.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock());
        drop(dropped);
    }
}

/// Callbacks run once at the end of a time slot, after it is quiescent.
#[derive(Default)]
pub struct StrobeQueue {
    pending: Mutex<Vec<Deferred>>,
}

impl StrobeQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a callback.
    pub fn push(&self, callback: impl FnOnce() + Send + 'static) {
        self.pending.lock().push(Box::new(callback));
    }

    /// Runs every queued callback, including ones queued by callbacks that
    /// run during the flush. Returns the number run.
    pub fn flush(&self) -> usize {
        let mut count = 0;
        loop {
            let batch = std::mem::take(&mut *self.pending.lock());
            if batch.is_empty() {
                return count;
            }
            count += batch.len();
            for callback in batch {
                callback();
            }
        }
    }

    /// Returns the number of queued callbacks.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drops every queued callback without running it.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.pending.lock());
        drop(dropped);
    }
}
