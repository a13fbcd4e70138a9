//! One-shot resumable units of work.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::Waker;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

/// The identity of a spawned task.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates an ID from a raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task #{}", self.0)
    }
}

enum Action {
    Call(Box<dyn FnOnce() + Send + 'static>),
    Wake(Waker),
}

/// "The rest of a process body": consumed by [`resume`](Continuation::resume).
///
/// A continuation either runs a callback or wakes a task. Task wakers only
/// hold a weak reference to their task, so resuming the continuation of a
/// task that has since been destroyed does nothing.
pub struct Continuation {
    owner: Option<TaskId>,
    action: Action,
}

impl Continuation {
    /// Creates a continuation that runs `f` when resumed.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self {
            owner: None,
            action: Action::Call(Box::new(f)),
        }
    }

    /// Creates a continuation that wakes the given waker when resumed.
    pub fn from_waker(waker: Waker) -> Self {
        Self {
            owner: None,
            action: Action::Wake(waker),
        }
    }

    /// Tags the continuation with the task it belongs to.
    pub fn owned_by(mut self, owner: TaskId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Returns the owning task, if the continuation was tagged with one.
    pub fn owner(&self) -> Option<TaskId> {
        self.owner
    }

    /// Runs the continuation, consuming it.
    pub fn resume(self) {
        match self.action {
            Action::Call(f) => f(),
            Action::Wake(waker) => waker.wake(),
        }
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.action {
            Action::Call(_) => "call",
            Action::Wake(_) => "wake",
        };
        f.debug_struct("Continuation")
            .field("owner", &self.owner)
            .field("kind", &kind)
            .finish()
    }
}
