//! `fork ... join` groups.
//!
//! Every branch becomes its own detached task. A [`ForkGroup`] counts the
//! branches the parent still has to wait for and triggers its wake event each
//! time one finishes; the [`Join`] future re-checks the count on every wakeup.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tracing::trace;

use crate::event::Event;
use crate::sched::Sched;

/// One branch of a fork.
pub type Branch = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// How many branches the parent waits for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum JoinKind {
    /// `join`: every branch.
    All,
    /// `join_any`: the first branch to finish.
    Any,
    /// `join_none`: none; the parent continues at once.
    None,
}

/// Shared completion counter of a fork.
#[derive(Debug)]
pub struct ForkGroup {
    remaining: AtomicIsize,
    wake: Event,
}

impl ForkGroup {
    /// Creates a group waiting for `count` completions.
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicIsize::new(isize::try_from(count).unwrap_or(isize::MAX)),
            wake: Event::new(),
        }
    }

    /// Returns how many completions are still awaited.
    pub fn remaining(&self) -> isize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Records one finished branch and wakes the joiner. Completions beyond
    /// the awaited count leave the counter at zero.
    pub fn complete_one(&self, sched: &Sched) {
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > 0).then(|| n - 1)
            });
        sched.trigger(&self.wake);
    }

    /// The event triggered on every completion.
    pub fn wake_event(&self) -> &Event {
        &self.wake
    }
}

/// Future returned by [`Sched::spawn_forked`].
#[must_use = "futures do nothing unless awaited"]
pub struct Join {
    inner: Option<Pin<Box<dyn Future<Output = ()> + Send + 'static>>>,
}

impl Future for Join {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Poll::Ready(());
        };
        let poll = inner.as_mut().poll(cx);
        if poll.is_ready() {
            self.inner = None;
        }
        poll
    }
}

impl Sched {
    /// Starts every branch as its own process and returns a future that
    /// completes according to `kind`.
    ///
    /// Branches start running immediately, in order, before this returns.
    pub fn spawn_forked(&self, branches: Vec<Branch>, kind: JoinKind) -> Join {
        trace!(branches = branches.len(), ?kind, "fork");
        if kind == JoinKind::None {
            for branch in branches {
                self.spawn(branch).detach();
            }
            return Join { inner: None };
        }

        let count = match kind {
            JoinKind::Any => branches.len().min(1),
            _ => branches.len(),
        };
        let group = Arc::new(ForkGroup::new(count));
        for branch in branches {
            let group = Arc::clone(&group);
            let sched = self.clone();
            self.spawn(async move {
                branch.await;
                group.complete_one(&sched);
            })
            .detach();
        }

        let sched = self.clone();
        Join {
            inner: Some(Box::pin(async move {
                while group.remaining() > 0 {
                    sched.wait_event(group.wake_event()).await;
                }
            })),
        }
    }
}
