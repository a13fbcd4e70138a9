//! Scheduler error types.
//!
//! Every variant of [`SchedError`] is a fatal logic error: it means the code
//! driving the scheduler broke one of its invariants. Lifetime problems
//! (a task or wait registration outliving its scope) are not errors; they are
//! turned into no-ops where they happen.

use kairos_diagnostics::{Category, Diagnostic, DiagnosticCode};

use crate::continuation::TaskId;
use crate::time::SimTime;

/// Errors that abort a simulation run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// A timed entry was pushed (or a drain requested) earlier than the current instant.
    #[error("time attempted to flow backwards: {time} requested at {now}")]
    TimeBackwards {
        /// The offending time.
        time: SimTime,
        /// The current simulation instant.
        now: SimTime,
    },

    /// A relative delay overflowed the time representation.
    #[error("delay of {delay} ticks overflows simulation time at {now}")]
    TimeOverflow {
        /// The current simulation instant.
        now: SimTime,
        /// The requested delay.
        delay: u64,
    },

    /// A task registered a second wait while its first one was still pending.
    #[error("{task} registered a second wait at {time} while already waiting")]
    DuplicateRegistration {
        /// The task that owns both registrations.
        task: TaskId,
        /// The current simulation instant.
        time: SimTime,
    },

    /// A wait was registered on an empty event set, which can never be satisfied.
    #[error("wait registered on an empty event set at {time}")]
    EmptyEventSet {
        /// The current simulation instant.
        time: SimTime,
    },

    /// A task awaited a task that is itself (transitively) awaiting the first.
    #[error("{task} awaited {awaited}, which is already waiting on it")]
    AwaitCycle {
        /// The task that tried to suspend.
        task: TaskId,
        /// The task it tried to await.
        awaited: TaskId,
    },

    /// An instant did not reach a fixed point within the configured round budget.
    #[error("instant {time} did not settle within {max_rounds} rounds")]
    RoundLimit {
        /// The instant that failed to converge.
        time: SimTime,
        /// The configured ceiling.
        max_rounds: u32,
    },
}

impl SchedError {
    /// Returns the stable diagnostic code for this error.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            SchedError::TimeBackwards { .. } => DiagnosticCode::new(Category::Timing, 1),
            SchedError::TimeOverflow { .. } => DiagnosticCode::new(Category::Timing, 2),
            SchedError::DuplicateRegistration { .. } => DiagnosticCode::new(Category::Scheduler, 1),
            SchedError::EmptyEventSet { .. } => DiagnosticCode::new(Category::Scheduler, 2),
            SchedError::AwaitCycle { .. } => DiagnosticCode::new(Category::Scheduler, 3),
            SchedError::RoundLimit { .. } => DiagnosticCode::new(Category::Scheduler, 4),
        }
    }

    /// Converts the error into a fatal diagnostic naming the offending time and object.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::fatal(self.code(), self.to_string());
        match self {
            SchedError::TimeBackwards { now, .. } | SchedError::TimeOverflow { now, .. } => {
                diag.at_time(now.ticks())
            }
            SchedError::DuplicateRegistration { task, time } => diag
                .at_time(time.ticks())
                .with_subject(task.to_string())
                .with_note("a task can be suspended at only one point at a time"),
            SchedError::EmptyEventSet { time } => diag.at_time(time.ticks()),
            SchedError::AwaitCycle { task, .. } => diag.with_subject(task.to_string()),
            SchedError::RoundLimit { time, .. } => diag
                .at_time(time.ticks())
                .with_help("look for processes that re-trigger each other every round"),
        }
    }
}
