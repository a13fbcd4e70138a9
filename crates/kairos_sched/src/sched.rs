//! The process-facing scheduler handle and its suspension points.
//!
//! Process bodies hold a cloned [`Sched`] and suspend on the futures it
//! returns: [`Delay`] for `#delay` and [`WaitFuture`] for `@(events)`. Each
//! future registers a continuation the first time it is polled; resuming that
//! continuation marks the future done and wakes the task that owns it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tracing::debug;

use crate::continuation::{Continuation, TaskId};
use crate::dispatcher::EventDispatcher;
use crate::error::SchedError;
use crate::event::{Event, EventSet};
use crate::index::WaitId;
use crate::regions::{NbaQueue, StrobeQueue};
use crate::task::{self, Task, TaskCore};
use crate::time::SimTime;
use crate::timed_queue::{TimedQueue, TimerId};

pub(crate) struct Shared {
    pub(crate) timed: TimedQueue,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) tasks: Mutex<HashMap<TaskId, Arc<TaskCore>>>,
    pub(crate) nba: NbaQueue,
    pub(crate) strobe: StrobeQueue,
    nba_event: Event,
    fatal: Mutex<Option<SchedError>>,
    finished: AtomicBool,
}

impl Shared {
    /// Records a fatal error. The first one wins.
    pub(crate) fn latch(&self, err: SchedError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            debug!(code = %err.code(), "latched fatal error: {err}");
            *fatal = Some(err);
        } else {
            debug!("{err} (suppressed, a fatal error is already pending)");
        }
    }
}

/// A cheap, clonable handle to one simulation's scheduler state.
#[derive(Clone)]
pub struct Sched {
    shared: Arc<Shared>,
}

impl Default for Sched {
    fn default() -> Self {
        Self::new()
    }
}

impl Sched {
    /// Creates an empty scheduler at time zero.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                timed: TimedQueue::new(),
                dispatcher: EventDispatcher::new(),
                tasks: Mutex::new(HashMap::new()),
                nba: NbaQueue::new(),
                strobe: StrobeQueue::new(),
                nba_event: Event::new(),
                fatal: Mutex::new(None),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Spawns a process body and polls it until its first suspension point.
    pub fn spawn<F>(&self, future: F) -> Task
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Task::spawn(Arc::downgrade(&self.shared), Box::pin(future))
    }

    /// Suspends the calling process for `ticks` time units.
    ///
    /// A zero delay resumes later in the same instant, after everything
    /// already due has run.
    pub fn delay(&self, ticks: u64) -> Delay {
        Delay::new(self, Target::After(ticks))
    }

    /// Suspends the calling process until the absolute time `time`.
    pub fn delay_until(&self, time: SimTime) -> Delay {
        Delay::new(self, Target::At(time))
    }

    /// Suspends the calling process until every event in `set` has been
    /// triggered in the same instant.
    pub fn wait(&self, set: EventSet) -> WaitFuture {
        WaitFuture {
            sched: self.clone(),
            set,
            state: WaitState::Unregistered,
        }
    }

    /// Suspends the calling process until `event` is triggered.
    pub fn wait_event(&self, event: &Event) -> WaitFuture {
        self.wait(EventSet::of(event))
    }

    /// Triggers `event`. Waiters run in the next resume round.
    pub fn trigger(&self, event: &Event) {
        self.shared.dispatcher.trigger(event);
    }

    /// Drops every wait involving `event` without resuming it.
    pub fn cancel(&self, event: &Event) {
        self.shared.dispatcher.cancel(event);
    }

    /// Queues a delayed assignment. It is applied once the active region of
    /// the current instant has settled.
    pub fn nba(&self, assign: impl FnOnce() + Send + 'static) {
        self.shared.nba.schedule(assign);
    }

    /// Queues a callback for the end of the current time slot.
    pub fn strobe(&self, callback: impl FnOnce() + Send + 'static) {
        self.shared.strobe.push(callback);
    }

    /// The event triggered each time the delayed-assignment region is entered.
    pub fn nba_event(&self) -> &Event {
        &self.shared.nba_event
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> SimTime {
        self.shared.timed.now()
    }

    /// Requests that the simulation stop once the current instant settles.
    pub fn finish(&self) {
        if !self.shared.finished.swap(true, Ordering::AcqRel) {
            debug!(time = %self.now(), "finish requested");
        }
    }

    /// Returns `true` once [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    /// Returns the timed queue.
    pub fn timed_queue(&self) -> &TimedQueue {
        &self.shared.timed
    }

    /// Returns the event dispatcher.
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.shared.dispatcher
    }

    /// Returns the number of detached tasks that have not completed yet.
    pub fn live_tasks(&self) -> usize {
        self.shared.tasks.lock().len()
    }

    /// Returns `true` if the detached task `id` has not completed yet.
    pub fn is_task_live(&self, id: TaskId) -> bool {
        self.shared.tasks.lock().contains_key(&id)
    }

    /// Takes the pending fatal error, if any.
    pub fn take_fatal(&self) -> Option<SchedError> {
        self.shared.fatal.lock().take()
    }

    pub(crate) fn latch(&self, err: SchedError) {
        self.shared.latch(err);
    }

    pub(crate) fn apply_nba(&self) -> usize {
        self.shared.nba.apply_all()
    }

    pub(crate) fn flush_strobes(&self) -> usize {
        self.shared.strobe.flush()
    }

    /// Destroys every detached task and drops every pending continuation.
    pub fn shutdown(&self) {
        let tasks: Vec<_> = self.shared.tasks.lock().drain().map(|(_, t)| t).collect();
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "cancelling live tasks");
        }
        for task in &tasks {
            task.cancel();
        }
        drop(tasks);
        drop(self.shared.timed.clear());
        self.shared.dispatcher.clear();
        self.shared.nba.clear();
        self.shared.strobe.clear();
    }
}

fn owned(continuation: Continuation) -> Continuation {
    match task::current() {
        Some(owner) => continuation.owned_by(owner),
        None => continuation,
    }
}

/// Builds a continuation that marks `fired` and wakes the polling task.
fn wake_on_resume(cx: &Context<'_>, fired: &Arc<AtomicBool>) -> Continuation {
    let fired = Arc::clone(fired);
    let waker = cx.waker().clone();
    owned(Continuation::new(move || {
        fired.store(true, Ordering::Release);
        waker.wake();
    }))
}

#[derive(Clone, Copy)]
enum Target {
    After(u64),
    At(SimTime),
}

enum DelayState {
    Unscheduled(Target),
    Scheduled {
        time: SimTime,
        id: TimerId,
        fired: Arc<AtomicBool>,
    },
    Failed,
}

/// Future returned by [`Sched::delay`] and [`Sched::delay_until`].
///
/// Dropping it before it fires takes its entry out of the timed queue, so a
/// cancelled process does not keep the clock running.
#[must_use = "futures do nothing unless awaited"]
pub struct Delay {
    sched: Sched,
    state: DelayState,
}

impl Delay {
    fn new(sched: &Sched, target: Target) -> Self {
        Self {
            sched: sched.clone(),
            state: DelayState::Unscheduled(target),
        }
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let target = match &this.state {
            DelayState::Unscheduled(target) => *target,
            DelayState::Scheduled { fired, .. } => {
                return if fired.load(Ordering::Acquire) {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                };
            }
            DelayState::Failed => return Poll::Pending,
        };

        let now = this.sched.now();
        let time = match target {
            Target::After(delay) => match now.checked_add(delay) {
                Some(time) => time,
                None => {
                    this.sched.latch(SchedError::TimeOverflow { now, delay });
                    this.state = DelayState::Failed;
                    return Poll::Pending;
                }
            },
            Target::At(time) => time,
        };
        let fired = Arc::new(AtomicBool::new(false));
        let continuation = wake_on_resume(cx, &fired);
        this.state = match this.sched.shared.timed.push(time, continuation) {
            Ok(id) => DelayState::Scheduled { time, id, fired },
            Err(err) => {
                this.sched.latch(err);
                DelayState::Failed
            }
        };
        Poll::Pending
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if let DelayState::Scheduled { time, id, fired } = &self.state {
            if !fired.load(Ordering::Acquire) {
                drop(self.sched.shared.timed.remove(*time, *id));
            }
        }
    }
}

enum WaitState {
    Unregistered,
    Waiting { id: WaitId, fired: Arc<AtomicBool> },
    Done,
    Failed,
}

/// Future returned by [`Sched::wait`] and [`Sched::wait_event`].
///
/// Dropping it while still registered removes the registration, so a
/// cancelled process never leaves a continuation behind in the index.
#[must_use = "futures do nothing unless awaited"]
pub struct WaitFuture {
    sched: Sched,
    set: EventSet,
    state: WaitState,
}

impl Future for WaitFuture {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match &this.state {
            WaitState::Unregistered => {
                let fired = Arc::new(AtomicBool::new(false));
                let continuation = wake_on_resume(cx, &fired);
                let dispatcher = &this.sched.shared.dispatcher;
                match dispatcher.register_wait(this.set.clone(), continuation) {
                    Ok(id) => this.state = WaitState::Waiting { id, fired },
                    Err(err) => {
                        this.sched.latch(err);
                        this.state = WaitState::Failed;
                    }
                }
                Poll::Pending
            }
            WaitState::Waiting { fired, .. } => {
                if fired.load(Ordering::Acquire) {
                    this.state = WaitState::Done;
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
            WaitState::Done => Poll::Ready(()),
            WaitState::Failed => Poll::Pending,
        }
    }
}

impl Drop for WaitFuture {
    fn drop(&mut self) {
        if let WaitState::Waiting { id, fired } = &self.state {
            if !fired.load(Ordering::Acquire) {
                self.sched.shared.dispatcher.unregister(&self.set, *id);
            }
        }
    }
}
