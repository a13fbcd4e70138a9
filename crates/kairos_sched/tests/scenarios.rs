//! Whole-kernel scenarios.
//!
//! These tests drive a `SimKernel` (or the raw queue and dispatcher) through
//! the orderings a simulator depends on: timed release, exactly-once wakeups,
//! fork/join arithmetic, and cancellation of suspended processes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::Poll;

use kairos_sched::{
    Branch, Continuation, Event, EventDispatcher, EventSet, JoinKind, SchedError, SimKernel,
    SimTime, Task, TimedQueue, ValueCell,
};
use parking_lot::Mutex;
use tempfile::TempDir;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().push(entry.into());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().clone()
}

fn labelled(log: &Log, label: &str) -> Continuation {
    let log = Arc::clone(log);
    let label = label.to_string();
    Continuation::new(move || push(&log, label))
}

// ---------------------------------------------------------------------------
// Timed queue and dispatcher
// ---------------------------------------------------------------------------

#[test]
fn timed_queue_releases_in_time_order() {
    let log = new_log();
    let q = TimedQueue::new();
    q.push(SimTime::from_ticks(10), labelled(&log, "c1")).unwrap();
    q.push(SimTime::from_ticks(5), labelled(&log, "c2")).unwrap();

    let due = q.drain_due(SimTime::from_ticks(5)).unwrap();
    assert_eq!(due.len(), 1);
    due.into_iter().for_each(Continuation::resume);
    assert_eq!(entries(&log), vec!["c2"]);

    let due = q.drain_due(SimTime::from_ticks(10)).unwrap();
    assert_eq!(due.len(), 1);
    due.into_iter().for_each(Continuation::resume);
    assert_eq!(entries(&log), vec!["c2", "c1"]);
}

#[test]
fn trigger_before_registration_still_wakes_once() {
    let log = new_log();
    let d = EventDispatcher::new();
    let a = Event::new();

    d.trigger(&a);
    d.register_wait(EventSet::of(&a), labelled(&log, "c")).unwrap();
    d.resume_all_triggered().unwrap();
    d.resume_all_triggered().unwrap();

    assert_eq!(entries(&log), vec!["c"]);
}

#[test]
fn conjunction_wakes_only_when_all_events_fired_in_the_instant() {
    let mut kernel = SimKernel::new();
    let log = new_log();
    let a = Event::new();
    let b = Event::new();

    let s = kernel.sched().clone();
    let set = EventSet::from_events([&a, &b]);
    let l = Arc::clone(&log);
    kernel.spawn(async move {
        s.wait(set).await;
        push(&l, format!("both at {}", s.now()));
    });

    // A at 1, B at 2: different instants, no wakeup. Both at 3: wakeup.
    let s = kernel.sched().clone();
    kernel.spawn(async move {
        s.delay(1).await;
        s.trigger(&a);
        s.delay(1).await;
        s.trigger(&b);
        s.delay(1).await;
        s.trigger(&b);
        s.trigger(&a);
    });

    kernel.run_to_completion().unwrap();
    assert_eq!(entries(&log), vec!["both at 3"]);
}

// ---------------------------------------------------------------------------
// Fork / join
// ---------------------------------------------------------------------------

#[test]
fn join_resumes_parent_only_after_every_branch() {
    let mut kernel = SimKernel::new();
    let resumed = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));
    let gates: Vec<Event> = (0..3).map(|_| Event::new()).collect();

    let s = kernel.sched().clone();
    let r = Arc::clone(&resumed);
    let branch_gates = gates.clone();
    let c = Arc::clone(&completed);
    kernel.spawn(async move {
        let branches: Vec<Branch> = branch_gates
            .into_iter()
            .map(|gate| {
                let s = s.clone();
                let c = Arc::clone(&c);
                Box::pin(async move {
                    s.wait_event(&gate).await;
                    c.fetch_add(1, Ordering::SeqCst);
                }) as Branch
            })
            .collect();
        s.spawn_forked(branches, JoinKind::All).await;
        r.fetch_add(1, Ordering::SeqCst);
    });

    let s = kernel.sched().clone();
    let releases = gates.clone();
    kernel.spawn(async move {
        for gate in &releases {
            s.delay(10).await;
            s.trigger(gate);
        }
    });

    kernel.run_until(SimTime::from_ticks(20)).unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    assert_eq!(resumed.load(Ordering::SeqCst), 0);

    kernel.run_to_completion().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 3);
    assert_eq!(resumed.load(Ordering::SeqCst), 1);
    assert_eq!(kernel.current_time(), SimTime::from_ticks(30));
}

#[test]
fn join_any_leaves_other_branches_running() {
    let mut kernel = SimKernel::new();
    let log = new_log();

    let s = kernel.sched().clone();
    let l = Arc::clone(&log);
    kernel.spawn(async move {
        let branches: Vec<Branch> = [30u64, 10, 20]
            .into_iter()
            .map(|ticks| {
                let s = s.clone();
                let l = Arc::clone(&l);
                Box::pin(async move {
                    s.delay(ticks).await;
                    push(&l, format!("branch {ticks}"));
                }) as Branch
            })
            .collect();
        s.spawn_forked(branches, JoinKind::Any).await;
        push(&l, format!("parent at {}", s.now()));
    });

    kernel.run_to_completion().unwrap();
    assert_eq!(
        entries(&log),
        vec!["branch 10", "parent at 10", "branch 20", "branch 30"]
    );
}

// ---------------------------------------------------------------------------
// Cancellation and lifetimes
// ---------------------------------------------------------------------------

#[test]
fn cancelled_task_leaves_no_live_continuations() {
    let mut kernel = SimKernel::new();
    let log = new_log();
    let ev = Event::new();

    let s = kernel.sched().clone();
    let e = ev.clone();
    let l = Arc::clone(&log);
    kernel.spawn(async move {
        // The child's event only fires after the parent has given up on it.
        let child = {
            let s2 = s.clone();
            let l2 = Arc::clone(&l);
            s.spawn(async move {
                s2.wait_event(&e).await;
                push(&l2, "child woke");
                s2.delay(100).await;
                push(&l2, "child finished");
            })
        };
        s.delay(5).await;
        drop(child);
        push(&l, "parent dropped child");
    });

    let s = kernel.sched().clone();
    kernel.spawn(async move {
        s.delay(10).await;
        s.trigger(&ev);
    });

    let result = kernel.run_to_completion().unwrap();
    assert_eq!(entries(&log), vec!["parent dropped child"]);
    assert_eq!(result.final_time, SimTime::from_ticks(10));
    assert_eq!(kernel.sched().dispatcher().waiting_count(), 0);
}

#[test]
fn destroying_an_awaited_task_never_resumes_its_awaiter() {
    let mut kernel = SimKernel::new();
    let log = new_log();
    let slot: Arc<Mutex<Option<Task>>> = Arc::new(Mutex::new(None));

    let s = kernel.sched().clone();
    let l = Arc::clone(&log);
    let awaited = Arc::clone(&slot);
    let parent = kernel.spawn(async move {
        let child = {
            let s2 = s.clone();
            let l2 = Arc::clone(&l);
            s.spawn(async move {
                s2.delay(100).await;
                push(&l2, "child finished");
            })
        };
        *awaited.lock() = Some(child);
        std::future::poll_fn(|cx| match awaited.lock().as_mut() {
            Some(child) => Pin::new(child).poll(cx),
            None => Poll::Pending,
        })
        .await;
        push(&l, "parent resumed");
    });

    let s = kernel.sched().clone();
    kernel.spawn(async move {
        s.delay(5).await;
        let child = slot.lock().take();
        assert!(child.is_some());
        drop(child);
    });

    let result = kernel.run_to_completion().unwrap();
    assert!(entries(&log).is_empty());
    assert_eq!(result.final_time, SimTime::from_ticks(5));
    assert!(kernel.sched().timed_queue().is_empty());
    assert_eq!(kernel.sched().dispatcher().waiting_count(), 0);
    assert_eq!(kernel.sched().live_tasks(), 1);
    assert!(kernel.sched().is_task_live(parent));
}

#[test]
fn dropping_the_kernel_releases_suspended_processes() {
    let dropped = Arc::new(AtomicUsize::new(0));

    struct Guard(Arc<AtomicUsize>);
    impl Drop for Guard {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    {
        let kernel = SimKernel::new();
        for _ in 0..3 {
            let s = kernel.sched().clone();
            let guard = Guard(Arc::clone(&dropped));
            kernel.spawn(async move {
                let _guard = guard;
                s.wait_event(&Event::new()).await;
            });
        }
        assert_eq!(kernel.sched().live_tasks(), 3);
    }
    assert_eq!(dropped.load(Ordering::SeqCst), 3);
}

#[test]
fn duplicate_wait_from_one_task_is_fatal() {
    let mut kernel = SimKernel::new();
    let a = Event::new();
    let b = Event::new();

    let s = kernel.sched().clone();
    kernel.spawn(async move {
        let mut first = s.wait_event(&a);
        let mut second = s.wait_event(&b);
        // Poll both waits from the same task without awaiting either.
        std::future::poll_fn(|cx| {
            let _ = Pin::new(&mut first).poll(cx);
            let _ = Pin::new(&mut second).poll(cx);
            Poll::<()>::Pending
        })
        .await;
    });

    let err = kernel.run_to_completion().unwrap_err();
    assert!(matches!(err, SchedError::DuplicateRegistration { .. }));
    assert_eq!(kernel.diagnostics().error_count(), 1);
}

// ---------------------------------------------------------------------------
// Regions, monitors and configuration
// ---------------------------------------------------------------------------

#[test]
fn nonblocking_swap_through_delayed_assignments() {
    let mut kernel = SimKernel::new();
    let a = ValueCell::new(1u8);
    let b = ValueCell::new(2u8);
    let clk = Event::new();

    // Two always blocks on the same edge: a <= b; b <= a;
    for (dst, src) in [(a.clone(), b.clone()), (b.clone(), a.clone())] {
        let s = kernel.sched().clone();
        let c = clk.clone();
        kernel.spawn(async move {
            loop {
                s.wait_event(&c).await;
                let value = src.get();
                let dst = dst.clone();
                s.nba(move || dst.set(value));
            }
        });
    }

    let s = kernel.sched().clone();
    kernel.spawn(async move {
        s.delay(1).await;
        s.trigger(&clk);
    });

    kernel.run_to_completion().unwrap();
    assert_eq!((a.get(), b.get()), (2, 1));
}

#[test]
fn wait_until_resumes_on_a_written_value() {
    let mut kernel = SimKernel::new();
    let count = ValueCell::new(0u32);
    let log = new_log();

    let s = kernel.sched().clone();
    let c = count.clone();
    let l = Arc::clone(&log);
    let watched = count.clone();
    kernel.spawn(async move {
        let c2 = c.clone();
        s.wait_until(move || c2.get() == 3, &[&watched]).await;
        push(&l, format!("count reached 3 at {}", s.now()));
    });

    let s = kernel.sched().clone();
    kernel.spawn(async move {
        for _ in 0..5 {
            s.delay(4).await;
            count.update(|v| *v += 1);
        }
    });

    kernel.run_to_completion().unwrap();
    assert_eq!(entries(&log), vec!["count reached 3 at 12"]);
}

#[test]
fn kernel_from_config_file_on_disk() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(kairos_config::CONFIG_FILE_NAME),
        r#"
[simulation]
name = "free_running"
time_limit = 100
timescale = "1ns"

[scheduler]
max_rounds_per_instant = 1000
"#,
    )
    .unwrap();
    let config = kairos_config::load_config(dir.path()).unwrap();

    let mut kernel = SimKernel::with_config(&config);
    let ticks = Arc::new(AtomicUsize::new(0));
    let s = kernel.sched().clone();
    let t = Arc::clone(&ticks);
    kernel.spawn(async move {
        loop {
            s.delay(7).await;
            t.fetch_add(1, Ordering::SeqCst);
        }
    });

    let result = kernel.run_to_completion().unwrap();
    assert!(result.hit_time_limit);
    assert_eq!(result.final_time, SimTime::from_ticks(98));
    assert_eq!(ticks.load(Ordering::SeqCst), 14);
}
