//! Events and event sets: the conditions processes wait on.
//!
//! An [`Event`] is a single-bit cell with identity. Clones share both the
//! identity and the bit, so the handle stored next to a signal and the handle
//! captured by a process refer to the same event. An [`EventSet`] is a
//! conjunction of event identities used as a key in the wait index.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(0);

/// The identity of an [`Event`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EventId(u64);

impl EventId {
    /// Creates an ID from a raw value.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event #{}", self.0)
    }
}

struct EventCell {
    id: EventId,
    triggered: AtomicBool,
}

/// A triggerable wakeup condition.
///
/// The flag reads `true` from the moment the event is triggered until the
/// dispatcher resets it when simulation time advances.
#[derive(Clone)]
pub struct Event {
    cell: Arc<EventCell>,
}

impl Event {
    /// Creates a new idle event with a fresh identity.
    pub fn new() -> Self {
        let id = EventId(NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            cell: Arc::new(EventCell {
                id,
                triggered: AtomicBool::new(false),
            }),
        }
    }

    /// Returns this event's identity.
    pub fn id(&self) -> EventId {
        self.cell.id
    }

    /// Returns `true` if the event was triggered in the current instant.
    pub fn is_triggered(&self) -> bool {
        self.cell.triggered.load(Ordering::Acquire)
    }

    /// Sets the flag, returning its previous value.
    pub(crate) fn set_triggered(&self) -> bool {
        self.cell.triggered.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn clear_triggered(&self) {
        self.cell.triggered.store(false, Ordering::Release);
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id().as_raw())
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

/// An unordered conjunction of events.
///
/// Stored sorted and deduplicated so that two sets holding the same events
/// compare and hash equal regardless of construction order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
pub struct EventSet {
    ids: Vec<EventId>,
}

impl EventSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set holding a single event.
    pub fn of(event: &Event) -> Self {
        Self {
            ids: vec![event.id()],
        }
    }

    /// Creates a set from the given events.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        events.into_iter().map(Event::id).collect()
    }

    /// Adds an event to the set.
    pub fn insert(&mut self, event: &Event) {
        if let Err(pos) = self.ids.binary_search(&event.id()) {
            self.ids.insert(pos, event.id());
        }
    }

    /// Returns `true` if the set contains the given event.
    pub fn contains(&self, id: EventId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    /// Returns the event identities in ascending order.
    pub fn ids(&self) -> &[EventId] {
        &self.ids
    }

    /// Returns the number of events in the set.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns `true` if the set holds no events.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<EventId> for EventSet {
    fn from_iter<I: IntoIterator<Item = EventId>>(iter: I) -> Self {
        let mut ids: Vec<EventId> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }
}

impl From<&Event> for EventSet {
    fn from(event: &Event) -> Self {
        Self::of(event)
    }
}

impl fmt::Display for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, id) in self.ids.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "#{}", id.as_raw())?;
        }
        write!(f, "}}")
    }
}
