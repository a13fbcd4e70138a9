//! The event-set to continuation index.
//!
//! [`WaitIndex`] maps each waited-on [`EventSet`] to the continuations blocked
//! on exactly that conjunction, and keeps a reverse map from every event to the
//! sets containing it so a trigger only visits the sets it can affect.
//!
//! The index itself is not synchronized; the dispatcher owns it behind a lock.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::continuation::{Continuation, TaskId};
use crate::event::{EventId, EventSet};

/// Identifies a single wait registration.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WaitId(u64);

impl fmt::Display for WaitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wait #{}", self.0)
    }
}

/// A registration refused because its task is already waiting elsewhere.
#[derive(Debug)]
pub struct DuplicateWait {
    /// The task that is already waiting.
    pub owner: TaskId,
    /// The continuation that was not registered.
    pub continuation: Continuation,
}

struct Registration {
    id: WaitId,
    continuation: Continuation,
}

/// Registered waits, keyed by event set, with a reverse index by event.
#[derive(Default)]
pub struct WaitIndex {
    by_set: HashMap<EventSet, Vec<Registration>>,
    by_event: HashMap<EventId, BTreeSet<EventSet>>,
    by_owner: HashMap<TaskId, WaitId>,
    next_id: u64,
}

impl WaitIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `continuation` as waiting on `set`.
    ///
    /// Fails if the owning task already has a live registration: a suspended
    /// task waits at exactly one point. The rejected continuation is handed
    /// back so the caller decides where it gets dropped.
    pub fn insert(
        &mut self,
        set: EventSet,
        continuation: Continuation,
    ) -> Result<WaitId, DuplicateWait> {
        if let Some(owner) = continuation.owner() {
            if self.by_owner.contains_key(&owner) {
                return Err(DuplicateWait {
                    owner,
                    continuation,
                });
            }
        }

        let id = WaitId(self.next_id);
        self.next_id += 1;

        if let Some(owner) = continuation.owner() {
            self.by_owner.insert(owner, id);
        }
        if !self.by_set.contains_key(&set) {
            for &event in set.ids() {
                self.by_event.entry(event).or_default().insert(set.clone());
            }
        }
        self.by_set
            .entry(set)
            .or_default()
            .push(Registration { id, continuation });
        Ok(id)
    }

    /// Returns `true` if any continuation waits on exactly this set.
    pub fn contains(&self, set: &EventSet) -> bool {
        self.by_set.contains_key(set)
    }

    /// Returns the waited-on sets that contain `event`, in a stable order.
    pub fn sets_containing(&self, event: EventId) -> Vec<EventSet> {
        self.by_event
            .get(&event)
            .map(|sets| sets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Moves every continuation waiting on `set` out of the index, in
    /// registration order.
    pub fn take(&mut self, set: &EventSet) -> Vec<Continuation> {
        let Some(regs) = self.by_set.remove(set) else {
            return Vec::new();
        };
        self.unlink_set(set);
        regs.into_iter()
            .map(|reg| {
                self.forget_owner(&reg);
                reg.continuation
            })
            .collect()
    }

    /// Removes a single registration, returning its continuation. Returns
    /// `None` if it was already gone (primed, cancelled, or never present).
    pub fn remove(&mut self, set: &EventSet, id: WaitId) -> Option<Continuation> {
        let regs = self.by_set.get_mut(set)?;
        let pos = regs.iter().position(|r| r.id == id)?;
        let reg = regs.remove(pos);
        let now_empty = regs.is_empty();
        self.forget_owner(&reg);
        if now_empty {
            self.by_set.remove(set);
            self.unlink_set(set);
        }
        Some(reg.continuation)
    }

    /// Removes every registration on any set containing `event`. The
    /// returned continuations are meant to be dropped, not resumed.
    pub fn remove_event(&mut self, event: EventId) -> Vec<Continuation> {
        let mut removed = Vec::new();
        for set in self.sets_containing(event) {
            removed.extend(self.take(&set));
        }
        removed
    }

    /// Removes everything, returning the dropped continuations.
    pub fn clear(&mut self) -> Vec<Continuation> {
        self.by_event.clear();
        self.by_owner.clear();
        self.by_set
            .drain()
            .flat_map(|(_, regs)| regs.into_iter().map(|r| r.continuation))
            .collect()
    }

    /// Returns the total number of registrations.
    pub fn len(&self) -> usize {
        self.by_set.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_set.is_empty()
    }

    /// Returns the number of distinct waited-on sets.
    pub fn set_count(&self) -> usize {
        self.by_set.len()
    }

    fn unlink_set(&mut self, set: &EventSet) {
        for event in set.ids() {
            if let Some(sets) = self.by_event.get_mut(event) {
                sets.remove(set);
                if sets.is_empty() {
                    self.by_event.remove(event);
                }
            }
        }
    }

    fn forget_owner(&mut self, reg: &Registration) {
        if let Some(owner) = reg.continuation.owner() {
            if self.by_owner.get(&owner) == Some(&reg.id) {
                self.by_owner.remove(&owner);
            }
        }
    }
}
