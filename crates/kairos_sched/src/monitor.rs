//! Value-change subscriptions, `$monitor`, and waits on predicates.
//!
//! A [`ValueCell`] calls every subscriber synchronously each time it is
//! written. This side-channel does not go through the dispatcher: it is meant
//! for observers, and for [`Sched::wait_until`], which turns writes into
//! triggers of a private event.

use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::event::Event;
use crate::sched::Sched;

/// A subscriber callback.
pub type Callback = Arc<dyn Fn() + Send + Sync + 'static>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    list: Vec<(u64, Callback)>,
}

/// A value whose writes can be observed.
pub struct ValueCell<T> {
    value: Arc<Mutex<T>>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<T: Default> Default for ValueCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> ValueCell<T> {
    /// Creates a cell holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(Mutex::new(value)),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        }
    }

    /// Stores `value` and notifies subscribers.
    pub fn set(&self, value: T) {
        *self.value.lock() = value;
        self.notify_written();
    }

    /// Modifies the value in place and notifies subscribers.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.value.lock());
        self.notify_written();
    }

    /// Calls every subscriber. Subscribers may read the cell.
    pub fn notify_written(&self) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .list
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Registers `callback` to run on every write until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribe_callback(Arc::new(callback))
    }

    fn subscribe_callback(&self, callback: Callback) -> Subscription {
        let mut subs = self.subscribers.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.list.push((id, callback));
        Subscription {
            list: Arc::downgrade(&self.subscribers),
            id,
        }
    }

    /// Returns the number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().list.len()
    }
}

impl<T: Clone> ValueCell<T> {
    /// Returns a copy of the current value.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }
}

/// Keeps a callback subscribed; unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    list: Weak<Mutex<Subscribers>>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(list) = self.list.upgrade() {
            let removed = {
                let mut subs = list.lock();
                subs.list
                    .iter()
                    .position(|(id, _)| *id == self.id)
                    .map(|pos| subs.list.remove(pos))
            };
            drop(removed);
        }
    }
}

/// Anything a [`Monitor`] or [`Sched::wait_until`] can watch.
pub trait Watch: Send + Sync {
    /// Subscribes `callback` to writes of the watched value.
    fn watch(&self, callback: Callback) -> Subscription;
}

impl<T: Send> Watch for ValueCell<T> {
    fn watch(&self, callback: Callback) -> Subscription {
        self.subscribe_callback(callback)
    }
}

/// A `$monitor`: one callback over a list of cells, switched on and off.
pub struct Monitor {
    callback: Callback,
    cells: Vec<Box<dyn Watch>>,
    active: Mutex<Vec<Subscription>>,
}

impl Monitor {
    /// Creates a monitor. It starts switched off.
    pub fn new(callback: impl Fn() + Send + Sync + 'static, cells: Vec<Box<dyn Watch>>) -> Self {
        Self {
            callback: Arc::new(callback),
            cells,
            active: Mutex::new(Vec::new()),
        }
    }

    /// Starts calling the callback on writes to any watched cell. Does
    /// nothing if the monitor is already on.
    pub fn on(&self) {
        let mut active = self.active.lock();
        if !active.is_empty() {
            return;
        }
        *active = self
            .cells
            .iter()
            .map(|cell| cell.watch(Arc::clone(&self.callback)))
            .collect();
        trace!(cells = self.cells.len(), "monitor on");
    }

    /// Stops calling the callback.
    pub fn off(&self) {
        let subs = std::mem::take(&mut *self.active.lock());
        drop(subs);
    }

    /// Returns `true` while the monitor is on.
    pub fn is_on(&self) -> bool {
        !self.active.lock().is_empty()
    }
}

impl Sched {
    /// Suspends the calling process until `pred` holds. The predicate is
    /// checked immediately, then again after every instant in which one of
    /// `cells` was written.
    pub fn wait_until<P>(
        &self,
        pred: P,
        cells: &[&dyn Watch],
    ) -> impl Future<Output = ()> + Send + 'static
    where
        P: Fn() -> bool + Send + 'static,
    {
        let changed = Event::new();
        let subs: Vec<Subscription> = cells
            .iter()
            .map(|cell| {
                let sched = self.clone();
                let event = changed.clone();
                cell.watch(Arc::new(move || sched.trigger(&event)))
            })
            .collect();
        let sched = self.clone();
        async move {
            let _subs = subs;
            while !pred() {
                sched.wait_event(&changed).await;
            }
        }
    }
}
