//! The simulation kernel: settles each instant, then advances time.
//!
//! One time slot runs as follows:
//!
//! 1. Resume primed continuations round after round until nothing is primed,
//!    entering the delayed-assignment region (the NBA event) whenever the
//!    active region goes quiet.
//! 2. Apply queued delayed assignments; if any were applied, go back to 1.
//! 3. When the queue's next entry lies in the future, run the strobe
//!    callbacks of the slot that just ended, reset event flags and advance.
//! 4. Resume every timed entry due at the new time.

use std::path::Path;

use kairos_config::{ConfigError, SimConfig, Timescale, DEFAULT_MAX_ROUNDS_PER_INSTANT};
use kairos_diagnostics::{
    Category, Diagnostic, DiagnosticCode, DiagnosticRenderer, DiagnosticSink, TerminalRenderer,
};
use tracing::{debug, error, info, warn};

use crate::continuation::TaskId;
use crate::error::SchedError;
use crate::sched::Sched;
use crate::time::SimTime;

/// Raised when a run ends at the configured time limit with work pending.
const TIME_LIMIT_REACHED: DiagnosticCode = DiagnosticCode::new(Category::Warning, 1);

/// The outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimResult {
    /// The simulation time when the run ended.
    pub final_time: SimTime,
    /// Whether the run was stopped by [`Sched::finish`].
    pub finished_by_user: bool,
    /// Whether the run stopped because the next entry lay beyond the time limit.
    pub hit_time_limit: bool,
    /// The total number of resume rounds executed.
    pub total_rounds: u64,
    /// The number of distinct instants simulated, time zero included.
    pub instants: u64,
}

/// The result of a single [`SimKernel::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// Time advanced (or a zero-delay batch ran); simulation can continue.
    Continued,
    /// Simulation is done (nothing scheduled, `$finish`, or the time limit).
    Done,
}

/// Drives a [`Sched`] from time zero until nothing is left to run.
///
/// Construct with [`SimKernel::new`] or [`SimKernel::with_config`], spawn the
/// initial processes, then call [`run`](SimKernel::run) or
/// [`run_to_completion`](SimKernel::run_to_completion).
pub struct SimKernel {
    /// The scheduler shared with every process.
    sched: Sched,
    /// Name of the run, for log lines.
    name: Option<String>,
    /// Length of one tick, for log lines.
    timescale: Option<Timescale>,
    /// Optional time limit in ticks.
    time_limit: Option<SimTime>,
    /// The limit of the run in progress.
    stop_at: Option<SimTime>,
    /// Maximum resume rounds per instant.
    max_rounds: u32,
    /// Number of distinct instants simulated, time zero included.
    instants: u64,
    /// Set once nothing is left to run or `$finish` was called.
    done: bool,
    /// Whether the last run stopped at the time limit.
    hit_time_limit: bool,
    /// Diagnostics raised while configuring and running.
    diagnostics: DiagnosticSink,
}

impl Default for SimKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl SimKernel {
    /// Creates a kernel with the default round ceiling and no time limit.
    pub fn new() -> Self {
        let kernel = Self {
            sched: Sched::new(),
            name: None,
            timescale: None,
            time_limit: None,
            stop_at: None,
            max_rounds: DEFAULT_MAX_ROUNDS_PER_INSTANT,
            instants: 0,
            done: false,
            hit_time_limit: false,
            diagnostics: DiagnosticSink::new(),
        };
        kernel.apply_round_limit();
        kernel
    }

    /// Creates a kernel configured from a parsed `kairos.toml`.
    pub fn with_config(config: &SimConfig) -> Self {
        let mut kernel = Self::new();
        kernel.apply_config(config);
        kernel
    }

    /// Loads `kairos.toml` from `run_dir` and applies it. A configuration
    /// error is also reported to [`diagnostics`](Self::diagnostics).
    pub fn configure(&mut self, run_dir: &Path) -> Result<(), ConfigError> {
        match kairos_config::load_config(run_dir) {
            Ok(config) => {
                self.apply_config(&config);
                Ok(())
            }
            Err(err) => {
                self.report(err.to_diagnostic());
                Err(err)
            }
        }
    }

    fn apply_config(&mut self, config: &SimConfig) {
        self.name = Some(config.simulation.name.clone());
        self.timescale = config.simulation.timescale;
        self.time_limit = config.simulation.time_limit.map(SimTime::from_ticks);
        self.stop_at = self.time_limit;
        self.set_max_rounds(config.scheduler.max_rounds_per_instant);
    }

    /// Returns the scheduler handle to give to processes.
    pub fn sched(&self) -> &Sched {
        &self.sched
    }

    /// Spawns a top-level process (an `initial` or `always` block). The
    /// kernel keeps it alive until it completes.
    pub fn spawn<F>(&self, future: F) -> TaskId
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.sched.spawn(future).detach()
    }

    /// Sets the time limit. Runs stop before advancing past it.
    pub fn set_time_limit(&mut self, limit: u64) {
        self.time_limit = Some(SimTime::from_ticks(limit));
        self.stop_at = self.time_limit;
    }

    /// Sets the maximum number of resume rounds per instant.
    pub fn set_max_rounds(&mut self, max: u32) {
        self.max_rounds = max;
        self.apply_round_limit();
    }

    fn apply_round_limit(&self) {
        self.sched.dispatcher().set_round_limit(Some(self.max_rounds));
    }

    /// Returns the current simulation time.
    pub fn current_time(&self) -> SimTime {
        self.sched.now()
    }

    /// Returns the configured tick length, if any.
    pub fn timescale(&self) -> Option<Timescale> {
        self.timescale
    }

    /// Returns the diagnostics raised so far.
    pub fn diagnostics(&self) -> &DiagnosticSink {
        &self.diagnostics
    }

    /// Runs for `duration` ticks past the current time.
    pub fn run(&mut self, duration: u64) -> Result<SimResult, SchedError> {
        let now = self.current_time();
        let end = now.checked_add(duration).ok_or_else(|| {
            self.fail(SchedError::TimeOverflow {
                now,
                delay: duration,
            })
        })?;
        self.run_until(end)
    }

    /// Runs until nothing is scheduled, `$finish` is called, or the configured
    /// time limit is reached.
    pub fn run_to_completion(&mut self) -> Result<SimResult, SchedError> {
        self.run_loop(self.time_limit)
    }

    /// Runs until the next scheduled entry lies after `limit` (or after the
    /// configured time limit, whichever comes first).
    pub fn run_until(&mut self, limit: SimTime) -> Result<SimResult, SchedError> {
        let limit = match self.time_limit {
            Some(configured) => configured.min(limit),
            None => limit,
        };
        self.run_loop(Some(limit))
    }

    fn run_loop(&mut self, stop_at: Option<SimTime>) -> Result<SimResult, SchedError> {
        self.stop_at = stop_at;
        info!(
            name = self.name.as_deref().unwrap_or("<unnamed>"),
            timescale = ?self.timescale.map(|ts| ts.to_string()),
            fs_per_tick = ?self.timescale.map(|ts| ts.femtoseconds_per_tick()),
            limit = ?stop_at.map(SimTime::ticks),
            "simulation started"
        );
        while self.step()? == StepResult::Continued {}
        let result = self.result();
        info!(
            final_time = %result.final_time,
            rounds = result.total_rounds,
            finished_by_user = result.finished_by_user,
            "simulation ended"
        );
        Ok(result)
    }

    /// Settles the current instant and advances to the next scheduled time.
    pub fn step(&mut self) -> Result<StepResult, SchedError> {
        if self.done {
            return Ok(StepResult::Done);
        }
        self.hit_time_limit = false;
        if self.instants == 0 {
            self.instants = 1;
        }
        self.settle().map_err(|e| self.fail(e))?;

        let timed = self.sched.timed_queue();
        let now = timed.now();
        let next = match timed.peek_earliest_time() {
            Some(next) if self.sched.is_finished() => {
                debug!(time = %now, pending = %next, "stopping on $finish");
                None
            }
            Some(next) if self.stop_at.is_some_and(|limit| next > limit) => {
                self.hit_time_limit = true;
                None
            }
            next => next,
        };
        let Some(next) = next else {
            self.sched.flush_strobes();
            self.check_fatal()?;
            if self.hit_time_limit && self.stop_at == self.time_limit {
                self.warn_time_limit(now);
            }
            self.done = !self.hit_time_limit;
            return Ok(StepResult::Done);
        };

        if next > now {
            self.sched.flush_strobes();
            self.check_fatal()?;
            self.sched.dispatcher().begin_instant(next);
            self.instants += 1;
            debug!(time = %next, "advancing time");
        }
        let due = timed.drain_due(next).map_err(|e| self.fail(e))?;
        for continuation in due {
            continuation.resume();
        }
        self.check_fatal()?;
        Ok(StepResult::Continued)
    }

    /// Runs the active and delayed-assignment regions to a fixed point.
    fn settle(&self) -> Result<(), SchedError> {
        let dispatcher = self.sched.dispatcher();
        loop {
            dispatcher.resume_all_triggered_with(self.sched.nba_event())?;
            if let Some(err) = self.sched.take_fatal() {
                return Err(err);
            }
            if self.sched.apply_nba() == 0 {
                return Ok(());
            }
        }
    }

    fn check_fatal(&self) -> Result<(), SchedError> {
        match self.sched.take_fatal() {
            Some(err) => Err(self.fail(err)),
            None => Ok(()),
        }
    }

    /// Records `err` as a fatal diagnostic and hands it back.
    fn fail(&self, err: SchedError) -> SchedError {
        self.report(err.to_diagnostic());
        err
    }

    fn warn_time_limit(&self, now: SimTime) {
        let pending = self.sched.timed_queue().len();
        self.report(
            Diagnostic::warning(TIME_LIMIT_REACHED, "simulation stopped at the time limit")
                .at_time(now.ticks())
                .with_note(format!("{pending} timed entries still pending")),
        );
    }

    fn report(&self, diag: Diagnostic) {
        let rendered = TerminalRenderer::new().render(&diag);
        if diag.severity.is_error() {
            error!("{rendered}");
        } else {
            warn!("{rendered}");
        }
        self.diagnostics.emit(diag);
    }

    fn result(&self) -> SimResult {
        SimResult {
            final_time: self.current_time(),
            finished_by_user: self.sched.is_finished(),
            hit_time_limit: self.hit_time_limit,
            total_rounds: self.sched.dispatcher().total_rounds(),
            instants: self.instants,
        }
    }
}

impl Drop for SimKernel {
    fn drop(&mut self) {
        self.sched.shutdown();
    }
}
