//! Cooperative, event-driven scheduler core for HDL simulation.
//!
//! Process bodies (one per `initial`/`always` block or task activation) are
//! `async` blocks spawned on a [`Sched`]. Every `.await` on a delay, an event
//! set, a fork or another task is a suspension point. A [`SimKernel`]
//! alternates between settling the current instant and advancing time to the
//! earliest timed entry.
//!
//! # Architecture
//!
//! - `timed_queue`: min-heap of `(time, continuation)`, FIFO among ties
//! - `index`: event set → waiting continuations, with a reverse index by event
//! - `dispatcher`: two-phase trigger: raised → primed → resumed
//! - `task`: suspendable tasks with weak-handle continuations
//! - `fork`: `join`, `join_any` and `join_none` groups
//! - `regions`: delayed-assignment and strobe queues
//! - `monitor`: value-change subscriptions and `$monitor`
//! - `kernel`: the simulation loop
//!
//! # Usage
//!
//! ```
//! use kairos_sched::{Event, SimKernel};
//!
//! let mut kernel = SimKernel::new();
//! let clk = Event::new();
//!
//! let s = kernel.sched().clone();
//! let c = clk.clone();
//! kernel.spawn(async move {
//!     for _ in 0..3 {
//!         s.delay(5).await;
//!         s.trigger(&c);
//!     }
//! });
//!
//! let result = kernel.run_to_completion().unwrap();
//! assert_eq!(result.final_time.ticks(), 15);
//! ```

#![warn(missing_docs)]

pub mod continuation;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod fork;
pub mod index;
pub mod kernel;
pub mod monitor;
pub mod regions;
pub mod sched;
pub mod task;
pub mod time;
pub mod timed_queue;

pub use continuation::{Continuation, TaskId};
pub use dispatcher::EventDispatcher;
pub use error::SchedError;
pub use event::{Event, EventId, EventSet};
pub use fork::{Branch, ForkGroup, Join, JoinKind};
pub use index::{WaitId, WaitIndex};
pub use kernel::{SimKernel, SimResult, StepResult};
pub use monitor::{Callback, Monitor, Subscription, ValueCell, Watch};
pub use regions::{NbaQueue, StrobeQueue};
pub use sched::{Delay, Sched, WaitFuture};
pub use task::Task;
pub use time::SimTime;
pub use timed_queue::{TimedQueue, TimerId};
