//! The event dispatcher: trigger, prime, resume.
//!
//! Triggering an event never resumes anything synchronously. It sets the
//! event's flag and appends it to the *raised* list. A prime pass then moves
//! every continuation whose whole [`EventSet`] is triggered out of the index
//! and onto the *primed* list, and a resume round runs that list. Side effects
//! of the round raise more events, which the next round primes and resumes,
//! until a prime pass finds nothing.
//!
//! Because a continuation leaves the index at the moment it is primed, it runs
//! exactly once per wakeup no matter how many of its events fired.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::continuation::Continuation;
use crate::error::SchedError;
use crate::event::{Event, EventId, EventSet};
use crate::index::{WaitId, WaitIndex};
use crate::time::SimTime;

#[derive(Default)]
struct DispatchState {
    index: WaitIndex,
    /// Raised since the last prime pass, in trigger order.
    raised: Vec<EventId>,
    raised_ids: HashSet<EventId>,
    /// Every event triggered in the current instant.
    triggered: HashMap<EventId, Event>,
    primed: Vec<Continuation>,
    now: SimTime,
    rounds_this_instant: u32,
    round_limit: Option<u32>,
    total_rounds: u64,
}

impl DispatchState {
    /// Moves every satisfied registration reachable from a raised event onto
    /// the primed list. Returns `true` if the primed list is non-empty.
    fn prime(&mut self) -> bool {
        let raised = std::mem::take(&mut self.raised);
        self.raised_ids.clear();
        for event in raised {
            for set in self.index.sets_containing(event) {
                let satisfied = set.ids().iter().all(|id| self.triggered.contains_key(id));
                if satisfied {
                    let woken = self.index.take(&set);
                    trace!(%set, count = woken.len(), "primed");
                    self.primed.extend(woken);
                }
            }
        }
        !self.primed.is_empty()
    }
}

/// Owns the wait index and the raised → primed → resumed pipeline.
///
/// All state sits behind a single lock that is never held while a
/// continuation runs, so triggers may arrive from foreign threads.
#[derive(Default)]
pub struct EventDispatcher {
    state: Mutex<DispatchState>,
}

impl EventDispatcher {
    /// Creates an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of resume rounds within one instant. `None` removes the cap.
    pub fn set_round_limit(&self, limit: Option<u32>) {
        self.state.lock().round_limit = limit;
    }

    /// Triggers `event`: sets its flag and queues it for the next prime pass.
    ///
    /// Triggering an event that is already raised and not yet primed has no
    /// further effect.
    pub fn trigger(&self, event: &Event) {
        event.set_triggered();
        let id = event.id();
        let mut state = self.state.lock();
        state.triggered.entry(id).or_insert_with(|| event.clone());
        if state.raised_ids.insert(id) {
            state.raised.push(id);
            trace!(event = %id, "raised");
        }
    }

    /// Registers `continuation` to run once every event in `set` has been
    /// triggered in the current instant.
    ///
    /// If another continuation already waits on the same set and one of its
    /// events is raised but not yet primed, pending priming is flushed first so
    /// the earlier waiter is woken by that trigger before this one joins.
    pub fn register_wait(
        &self,
        set: EventSet,
        continuation: Continuation,
    ) -> Result<WaitId, SchedError> {
        let mut state = self.state.lock();
        if set.is_empty() {
            let time = state.now;
            drop(state);
            drop(continuation);
            return Err(SchedError::EmptyEventSet { time });
        }
        let racing = state.index.contains(&set)
            && set.ids().iter().any(|id| state.raised_ids.contains(id));
        if racing {
            state.prime();
        }
        match state.index.insert(set, continuation) {
            Ok(id) => Ok(id),
            Err(dup) => {
                let time = state.now;
                drop(state);
                let task = dup.owner;
                drop(dup);
                Err(SchedError::DuplicateRegistration { task, time })
            }
        }
    }

    /// Removes a registration that is no longer wanted. Returns `false` if it
    /// was already primed or cancelled.
    pub fn unregister(&self, set: &EventSet, id: WaitId) -> bool {
        let removed = self.state.lock().index.remove(set, id);
        removed.is_some()
    }

    /// Returns `true` if any continuation waits on exactly `set`.
    pub fn is_set_waiting(&self, set: &EventSet) -> bool {
        self.state.lock().index.contains(set)
    }

    /// Runs one prime pass. Returns `true` if anything is waiting to be resumed.
    pub fn prime_triggered(&self) -> bool {
        self.state.lock().prime()
    }

    /// Resumes primed continuations round after round until a prime pass
    /// yields nothing. Returns the number of rounds run.
    pub fn resume_all_triggered(&self) -> Result<u32, SchedError> {
        let mut rounds = 0;
        loop {
            let batch = {
                let mut state = self.state.lock();
                state.prime();
                if state.primed.is_empty() {
                    break;
                }
                state.rounds_this_instant += 1;
                state.total_rounds += 1;
                if let Some(max_rounds) = state.round_limit {
                    if state.rounds_this_instant > max_rounds {
                        return Err(SchedError::RoundLimit {
                            time: state.now,
                            max_rounds,
                        });
                    }
                }
                std::mem::take(&mut state.primed)
            };
            rounds += 1;
            trace!(round = rounds, count = batch.len(), "resuming");
            for continuation in batch {
                continuation.resume();
            }
        }
        Ok(rounds)
    }

    /// Like [`resume_all_triggered`](Self::resume_all_triggered), but after
    /// the active continuations settle, triggers `dly_event` so processes
    /// waiting on the delayed-assignment region run, and keeps going while
    /// that wakes anything.
    pub fn resume_all_triggered_with(&self, dly_event: &Event) -> Result<u32, SchedError> {
        let mut rounds = 0;
        loop {
            rounds += self.resume_all_triggered()?;
            self.trigger(dly_event);
            if !self.prime_triggered() {
                return Ok(rounds);
            }
        }
    }

    /// Stops every wait on a set containing `event` and forgets that it was
    /// triggered. The dropped waiters are never resumed.
    pub fn cancel(&self, event: &Event) {
        let id = event.id();
        let dropped = {
            let mut state = self.state.lock();
            state.triggered.remove(&id);
            if state.raised_ids.remove(&id) {
                state.raised.retain(|e| *e != id);
            }
            state.index.remove_event(id)
        };
        event.clear_triggered();
        debug!(event = %id, dropped = dropped.len(), "cancelled waits");
    }

    /// Clears the flag of every event triggered so far and starts counting
    /// rounds afresh.
    pub fn reset_triggered(&self) {
        let mut state = self.state.lock();
        for event in state.triggered.values() {
            event.clear_triggered();
        }
        state.triggered.clear();
        state.rounds_this_instant = 0;
    }

    /// Starts a new instant at `time`: resets the triggered flags.
    pub fn begin_instant(&self, time: SimTime) {
        self.reset_triggered();
        self.state.lock().now = time;
    }

    /// Returns the number of registered waits.
    pub fn waiting_count(&self) -> usize {
        self.state.lock().index.len()
    }

    /// Returns the total number of resume rounds run so far.
    pub fn total_rounds(&self) -> u64 {
        self.state.lock().total_rounds
    }

    /// Drops every registration and every pending trigger.
    pub fn clear(&self) {
        let (waiting, primed) = {
            let mut state = self.state.lock();
            state.raised.clear();
            state.raised_ids.clear();
            (state.index.clear(), std::mem::take(&mut state.primed))
        };
        drop(waiting);
        drop(primed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        fn new() -> Self {
            Self {
                log: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn cont(&self, label: &str) -> Continuation {
            let log = Arc::clone(&self.log);
            let label = label.to_string();
            Continuation::new(move || log.lock().push(label))
        }

        fn count(&self, label: &str) -> usize {
            self.log.lock().iter().filter(|l| *l == label).count()
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().clone()
        }
    }

    #[test]
    fn trigger_then_register_then_resume_runs_once() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();

        d.trigger(&a);
        d.register_wait(EventSet::of(&a), p.cont("c")).unwrap();
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("c"), 1);

        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("c"), 1);
    }

    #[test]
    fn trigger_does_not_resume_synchronously() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        d.register_wait(EventSet::of(&a), p.cont("c")).unwrap();
        d.trigger(&a);
        assert!(a.is_triggered());
        assert_eq!(p.count("c"), 0);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("c"), 1);
    }

    #[test]
    fn double_trigger_is_idempotent() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        d.register_wait(EventSet::of(&a), p.cont("c")).unwrap();
        d.register_wait(EventSet::of(&a), p.cont("c")).unwrap();
        d.trigger(&a);
        d.trigger(&a);
        assert_eq!(d.resume_all_triggered().unwrap(), 1);
        assert_eq!(p.count("c"), 2);
    }

    #[test]
    fn conjunction_needs_every_event() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();
        d.register_wait(EventSet::from_events([&a, &b]), p.cont("ab"))
            .unwrap();

        d.trigger(&a);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 0);
        assert!(d.is_set_waiting(&EventSet::from_events([&a, &b])));

        d.trigger(&b);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 1);
        assert!(!d.is_set_waiting(&EventSet::from_events([&a, &b])));
    }

    #[test]
    fn conjunction_in_reverse_order() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();
        d.register_wait(EventSet::from_events([&a, &b]), p.cont("ab"))
            .unwrap();
        d.trigger(&b);
        d.resume_all_triggered().unwrap();
        d.trigger(&a);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 1);
    }

    #[test]
    fn conjunction_fires_once_when_both_trigger_together() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();
        d.register_wait(EventSet::from_events([&a, &b]), p.cont("ab"))
            .unwrap();
        d.trigger(&a);
        d.trigger(&b);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 1);
        assert_eq!(d.waiting_count(), 0);
    }

    #[test]
    fn registration_after_partial_trigger_still_wakes() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();

        // A fires and is primed away before anyone waits on {A, B}.
        d.trigger(&a);
        d.resume_all_triggered().unwrap();

        d.register_wait(EventSet::from_events([&a, &b]), p.cont("ab"))
            .unwrap();
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 0);

        d.trigger(&b);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 1);
    }

    #[test]
    fn single_event_wait_ignores_already_primed_trigger() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        d.trigger(&a);
        d.resume_all_triggered().unwrap();

        d.register_wait(EventSet::of(&a), p.cont("late")).unwrap();
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("late"), 0);

        d.trigger(&a);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("late"), 1);
    }

    #[test]
    fn racing_registration_flushes_existing_waiters_first() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let set = EventSet::of(&a);

        d.register_wait(set.clone(), p.cont("early")).unwrap();
        d.trigger(&a);
        d.register_wait(set.clone(), p.cont("late")).unwrap();
        d.resume_all_triggered().unwrap();

        assert_eq!(p.entries(), vec!["early"]);
        assert!(d.is_set_waiting(&set));
    }

    #[test]
    fn cascading_triggers_run_breadth_first() {
        let d = Arc::new(EventDispatcher::new());
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();

        // Round 1 wakes x and y on A; x triggers B, whose waiter z must not
        // run before y.
        let dx = Arc::clone(&d);
        let bx = b.clone();
        let log = Arc::clone(&p.log);
        d.register_wait(
            EventSet::of(&a),
            Continuation::new(move || {
                log.lock().push("x".into());
                dx.trigger(&bx);
            }),
        )
        .unwrap();
        d.register_wait(EventSet::of(&a), p.cont("y")).unwrap();
        d.register_wait(EventSet::of(&b), p.cont("z")).unwrap();

        d.trigger(&a);
        assert_eq!(d.resume_all_triggered().unwrap(), 2);
        assert_eq!(p.entries(), vec!["x", "y", "z"]);
    }

    #[test]
    fn round_limit_is_fatal() {
        let d = Arc::new(EventDispatcher::new());
        let a = Event::new();
        d.set_round_limit(Some(5));

        fn rearm(d: Arc<EventDispatcher>, a: Event) {
            let d2 = Arc::clone(&d);
            let a2 = a.clone();
            d.register_wait(
                EventSet::of(&a),
                Continuation::new(move || {
                    d2.trigger(&a2);
                    rearm(Arc::clone(&d2), a2.clone());
                }),
            )
            .unwrap();
        }

        rearm(Arc::clone(&d), a.clone());
        d.trigger(&a);
        let err = d.resume_all_triggered().unwrap_err();
        assert_eq!(
            err,
            SchedError::RoundLimit {
                time: SimTime::ZERO,
                max_rounds: 5
            }
        );
    }

    #[test]
    fn empty_set_is_fatal() {
        let d = EventDispatcher::new();
        let err = d
            .register_wait(EventSet::new(), Continuation::new(|| {}))
            .unwrap_err();
        assert!(matches!(err, SchedError::EmptyEventSet { .. }));
    }

    #[test]
    fn duplicate_owner_registration_is_fatal() {
        use crate::continuation::TaskId;
        let d = EventDispatcher::new();
        let a = Event::new();
        let owner = TaskId::from_raw(500);
        d.register_wait(EventSet::of(&a), Continuation::new(|| {}).owned_by(owner))
            .unwrap();
        let err = d
            .register_wait(EventSet::of(&a), Continuation::new(|| {}).owned_by(owner))
            .unwrap_err();
        assert!(matches!(
            err,
            SchedError::DuplicateRegistration { task, .. } if task == owner
        ));
    }

    #[test]
    fn unregister_prevents_resume() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let id = d.register_wait(EventSet::of(&a), p.cont("gone")).unwrap();
        assert!(d.unregister(&EventSet::of(&a), id));
        assert!(!d.unregister(&EventSet::of(&a), id));
        d.trigger(&a);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("gone"), 0);
    }

    #[test]
    fn cancel_drops_waiters_and_trigger() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();
        d.register_wait(EventSet::of(&a), p.cont("a")).unwrap();
        d.register_wait(EventSet::from_events([&a, &b]), p.cont("ab"))
            .unwrap();
        d.register_wait(EventSet::of(&b), p.cont("b")).unwrap();
        d.trigger(&a);
        d.cancel(&a);
        assert!(!a.is_triggered());
        d.trigger(&b);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.entries(), vec!["b"]);
        assert_eq!(d.waiting_count(), 0);
    }

    #[test]
    fn reset_clears_flags_between_instants() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        let b = Event::new();
        d.trigger(&a);
        d.resume_all_triggered().unwrap();

        d.begin_instant(SimTime::from_ticks(10));
        assert!(!a.is_triggered());

        // A's trigger belongs to the previous instant and no longer counts.
        d.register_wait(EventSet::from_events([&a, &b]), p.cont("ab"))
            .unwrap();
        d.trigger(&b);
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("ab"), 0);
    }

    #[test]
    fn delayed_assignment_event_runs_after_active_region() {
        let d = Arc::new(EventDispatcher::new());
        let p = Recorder::new();
        let a = Event::new();
        let dly = Event::new();

        d.register_wait(EventSet::of(&dly), p.cont("nba")).unwrap();
        d.register_wait(EventSet::of(&a), p.cont("active")).unwrap();
        d.trigger(&a);
        d.resume_all_triggered_with(&dly).unwrap();
        assert_eq!(p.entries(), vec!["active", "nba"]);
    }

    #[test]
    fn clear_drops_everything() {
        let d = EventDispatcher::new();
        let p = Recorder::new();
        let a = Event::new();
        d.register_wait(EventSet::of(&a), p.cont("x")).unwrap();
        d.trigger(&a);
        d.clear();
        d.resume_all_triggered().unwrap();
        assert_eq!(p.count("x"), 0);
        assert_eq!(d.waiting_count(), 0);
    }
}
