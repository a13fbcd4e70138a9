//! Suspendable tasks: process bodies driven by the scheduler's own waker.
//!
//! A task owns a pinned future. It is polled eagerly when spawned and again
//! whenever one of its continuations is resumed. Continuations reach the task
//! through a [`Weak`] handle, so once the task is gone they do nothing.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;
use tracing::trace;

use crate::continuation::{Continuation, TaskId};
use crate::error::SchedError;
use crate::sched::Shared;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

thread_local! {
    static CURRENT: RefCell<Option<Arc<TaskCore>>> = const { RefCell::new(None) };
}

/// Returns the id of the task being polled on this thread, if any.
pub fn current() -> Option<TaskId> {
    CURRENT.with(|c| c.borrow().as_ref().map(|t| t.id))
}

pub(crate) fn current_core() -> Option<Arc<TaskCore>> {
    CURRENT.with(|c| c.borrow().clone())
}

struct CurrentGuard {
    prev: Option<Arc<TaskCore>>,
}

impl CurrentGuard {
    fn enter(task: &Arc<TaskCore>) -> Self {
        let prev = CURRENT.with(|c| c.borrow_mut().replace(Arc::clone(task)));
        Self { prev }
    }
}

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let prev = self.prev.take();
        CURRENT.with(|c| *c.borrow_mut() = prev);
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Status {
    Idle,
    Polling,
    Completed,
    Cancelled,
}

struct TaskState {
    future: Option<BoxFuture>,
    status: Status,
    /// Woken while being polled; poll again before going idle.
    notified: bool,
    waiter: Option<Continuation>,
    awaiting: Option<Weak<TaskCore>>,
    detached: bool,
}

pub(crate) struct TaskCore {
    id: TaskId,
    sched: Weak<Shared>,
    state: Mutex<TaskState>,
}

impl TaskCore {
    fn new(id: TaskId, sched: Weak<Shared>, future: BoxFuture) -> Self {
        Self {
            id,
            sched,
            state: Mutex::new(TaskState {
                future: Some(future),
                status: Status::Idle,
                notified: false,
                waiter: None,
                awaiting: None,
                detached: false,
            }),
        }
    }

    fn waker(self: &Arc<Self>) -> Waker {
        Waker::from(Arc::new(TaskWaker {
            task: Arc::downgrade(self),
        }))
    }

    /// Polls the task until it suspends or completes.
    pub(crate) fn run(self: &Arc<Self>) {
        let mut future = {
            let mut state = self.state.lock();
            match state.status {
                Status::Idle => {}
                Status::Polling => {
                    state.notified = true;
                    return;
                }
                Status::Completed | Status::Cancelled => return,
            }
            let Some(future) = state.future.take() else {
                return;
            };
            state.status = Status::Polling;
            future
        };

        let waker = self.waker();
        let mut cx = Context::from_waker(&waker);
        loop {
            let poll = {
                let _current = CurrentGuard::enter(self);
                future.as_mut().poll(&mut cx)
            };
            match poll {
                Poll::Ready(()) => {
                    drop(future);
                    self.complete();
                    return;
                }
                Poll::Pending => {
                    let mut state = self.state.lock();
                    if state.status == Status::Cancelled {
                        drop(state);
                        drop(future);
                        return;
                    }
                    if state.notified {
                        state.notified = false;
                        continue;
                    }
                    state.status = Status::Idle;
                    state.future = Some(future);
                    return;
                }
            }
        }
    }

    fn complete(self: &Arc<Self>) {
        let (waiter, detached) = {
            let mut state = self.state.lock();
            state.status = Status::Completed;
            state.awaiting = None;
            (state.waiter.take(), state.detached)
        };
        trace!(task = %self.id, "completed");
        if detached {
            if let Some(shared) = self.sched.upgrade() {
                let removed = shared.tasks.lock().remove(&self.id);
                drop(removed);
            }
        }
        if let Some(waiter) = waiter {
            waiter.resume();
        }
    }

    /// Destroys the task before completion. Its waiter is dropped unresumed.
    pub(crate) fn cancel(&self) {
        let (future, waiter) = {
            let mut state = self.state.lock();
            match state.status {
                Status::Completed | Status::Cancelled => return,
                Status::Polling => {
                    // `run` drops the future once the poll returns.
                    state.status = Status::Cancelled;
                    (None, state.waiter.take())
                }
                Status::Idle => {
                    state.status = Status::Cancelled;
                    (state.future.take(), state.waiter.take())
                }
            }
        };
        trace!(task = %self.id, "cancelled");
        drop(future);
        drop(waiter);
    }

    fn is_finished(&self) -> bool {
        matches!(
            self.state.lock().status,
            Status::Completed | Status::Cancelled
        )
    }

    fn is_waiting(&self) -> bool {
        matches!(self.state.lock().status, Status::Idle | Status::Polling)
    }

    /// Returns `true` if following the await chain from `self` reaches `target`.
    fn awaits(self: &Arc<Self>, target: &Arc<TaskCore>) -> bool {
        let mut next = Some(Arc::clone(self));
        while let Some(task) = next {
            if Arc::ptr_eq(&task, target) {
                return true;
            }
            if !task.is_waiting() {
                return false;
            }
            next = task.state.lock().awaiting.as_ref().and_then(Weak::upgrade);
        }
        false
    }
}

struct TaskWaker {
    task: Weak<TaskCore>,
}

impl Wake for TaskWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(task) = self.task.upgrade() {
            task.run();
        }
    }
}

/// A handle to a spawned task.
///
/// Awaiting the handle suspends until the task completes. Dropping it before
/// completion destroys the task; use [`detach`](Task::detach) to let it run on.
/// `Task` is not `Clone`, so a task has at most one awaiter.
#[must_use = "dropping a Task cancels it; call `detach` to let it run"]
pub struct Task {
    core: Arc<TaskCore>,
    detached: bool,
}

impl Task {
    pub(crate) fn spawn(sched: Weak<Shared>, future: BoxFuture) -> Self {
        let core = Arc::new(TaskCore::new(TaskId::next(), sched, future));
        trace!(task = %core.id, "spawned");
        core.run();
        Self {
            core,
            detached: false,
        }
    }

    /// Returns the task's id.
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Returns `true` once the task has completed.
    pub fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    /// Hands the task to the scheduler, which keeps it alive until it completes.
    pub fn detach(mut self) -> TaskId {
        self.detached = true;
        let core = Arc::clone(&self.core);
        let id = core.id;
        {
            let mut state = core.state.lock();
            if matches!(state.status, Status::Completed | Status::Cancelled) {
                return id;
            }
            state.detached = true;
        }
        if let Some(shared) = core.sched.upgrade() {
            shared.tasks.lock().insert(id, core);
        }
        id
    }
}

impl Future for Task {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let core = &self.core;
        let me = current_core();

        if core.state.lock().status == Status::Completed {
            if let Some(me) = &me {
                me.state.lock().awaiting = None;
            }
            return Poll::Ready(());
        }

        if let Some(me) = &me {
            if core.awaits(me) {
                let err = SchedError::AwaitCycle {
                    task: me.id,
                    awaited: core.id,
                };
                if let Some(shared) = core.sched.upgrade() {
                    shared.latch(err);
                }
                return Poll::Pending;
            }
            me.state.lock().awaiting = Some(Arc::downgrade(core));
        }

        let mut waiter = Continuation::from_waker(cx.waker().clone());
        if let Some(me) = &me {
            waiter = waiter.owned_by(me.id);
        }
        let replaced = {
            let mut state = core.state.lock();
            if state.status == Status::Cancelled {
                None
            } else {
                state.waiter.replace(waiter)
            }
        };
        drop(replaced);
        Poll::Pending
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if let Some(me) = current_core() {
            let mut state = me.state.lock();
            let awaited_self = state
                .awaiting
                .as_ref()
                .is_some_and(|w| w.as_ptr() == Arc::as_ptr(&self.core));
            if awaited_self {
                state.awaiting = None;
            }
        }
        if !self.detached {
            self.core.cancel();
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.core.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}
