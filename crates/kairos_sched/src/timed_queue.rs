//! The delayed-resumption queue.
//!
//! [`TimedQueue`] is a min-priority queue of `(time, continuation)` pairs and
//! the scheduler's authority on "what runs next and when". Entries with equal
//! times are released in insertion order. Every entry gets a [`TimerId`] so a
//! suspension point that is abandoned can take its entry back out.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use crate::continuation::Continuation;
use crate::error::SchedError;
use crate::time::SimTime;

/// Identifies one pending entry of a [`TimedQueue`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer #{}", self.0)
    }
}

#[derive(Default)]
struct QueueState {
    /// Keyed by time, then by insertion order.
    entries: BTreeMap<(SimTime, TimerId), Continuation>,
    next_id: u64,
    now: SimTime,
}

/// A thread-safe priority queue of continuations keyed by wake-up time.
///
/// The queue also tracks the current simulation instant: it advances on every
/// [`drain_due`](Self::drain_due), and pushing anything earlier than it is a
/// fatal error.
#[derive(Default)]
pub struct TimedQueue {
    state: Mutex<QueueState>,
}

impl TimedQueue {
    /// Creates an empty queue at time zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `continuation` to run at `time`.
    pub fn push(&self, time: SimTime, continuation: Continuation) -> Result<TimerId, SchedError> {
        let mut state = self.state.lock();
        if time < state.now {
            return Err(SchedError::TimeBackwards {
                time,
                now: state.now,
            });
        }
        let id = TimerId(state.next_id);
        state.next_id += 1;
        state.entries.insert((time, id), continuation);
        Ok(id)
    }

    /// Takes a pending entry back out without running it. Returns `None` if it
    /// was already drained or removed.
    pub fn remove(&self, time: SimTime, id: TimerId) -> Option<Continuation> {
        self.state.lock().entries.remove(&(time, id))
    }

    /// Returns the earliest scheduled time, or `None` if nothing is pending.
    pub fn peek_earliest_time(&self) -> Option<SimTime> {
        self.state
            .lock()
            .entries
            .first_key_value()
            .map(|((time, _), _)| *time)
    }

    /// Advances the current instant to `time` and removes every entry due at
    /// or before it, earliest first.
    pub fn drain_due(&self, time: SimTime) -> Result<Vec<Continuation>, SchedError> {
        let mut state = self.state.lock();
        if time < state.now {
            return Err(SchedError::TimeBackwards {
                time,
                now: state.now,
            });
        }
        state.now = time;
        let mut due = Vec::new();
        while state
            .entries
            .first_key_value()
            .is_some_and(|((t, _), _)| *t <= time)
        {
            if let Some((_, continuation)) = state.entries.pop_first() {
                due.push(continuation);
            }
        }
        Ok(due)
    }

    /// Returns the current simulation instant.
    pub fn now(&self) -> SimTime {
        self.state.lock().now
    }

    /// Returns the number of pending entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Drops every pending entry without running it.
    pub fn clear(&self) -> Vec<Continuation> {
        let entries = std::mem::take(&mut self.state.lock().entries);
        entries.into_values().collect()
    }
}
