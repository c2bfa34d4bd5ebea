//! Compiler bootstrap.
//!
//! Before the managed compiler compiles application code it compiles a
//! curated seed set of its own dependencies. The seed tasks go through the
//! same compile queue the VM uses for ordinary requests, so completion is
//! detected by polling the queue until it drains.
//!
//! # Drain detection
//!
//! Right after seeding, the queue may briefly report zero pending tasks
//! before a worker has picked anything up. A zero depth therefore only ends
//! the first round once some request was actually handled:
//!
//! ```text
//!                         depth == 0 && !handled
//!                              ┌──────┐
//!                              ▼      │
//!  ──► AwaitingFirstCompletion ───────┘
//!          │ depth > 0            │ depth == 0 && handled
//!          ▼                      ▼
//!       Draining ──depth == 0──► Drained
//!        ▲    │ depth > 0
//!        └────┘
//! ```
//!
//! The loop has no timeout; a hang in the managed compiler blocks bootstrap
//! until an external watchdog aborts the process.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::counter::BootstrapCounters;
use super::dispatch::ManagedCompiler;
use super::types::{
    BootstrapConfig, CompileIdSequence, CompileTask, CompileTier, CompilerState, EntryKind,
    MethodRef, StateCell,
};
use crate::errors::{BootstrapError, QueueError};

/// The VM compile queue, as seen by the bridge.
pub trait CompileQueue: Send + Sync {
    /// Number of tasks of `tier` that are still pending.
    fn queue_depth(&self, tier: CompileTier) -> usize;

    /// Submit a task for asynchronous compilation.
    fn enqueue(&self, task: CompileTask) -> Result<(), QueueError>;
}

/// Phase of the bootstrap drain loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainPhase {
    /// Nothing observed yet; an empty queue is not trusted.
    AwaitingFirstCompletion,
    /// Work was observed; the next empty queue ends bootstrap.
    Draining,
    Drained,
}

impl DrainPhase {
    /// Advance after one poll of the queue.
    pub fn observe(self, depth: usize, request_handled: bool) -> Self {
        match self {
            Self::AwaitingFirstCompletion if depth == 0 && !request_handled => {
                Self::AwaitingFirstCompletion
            }
            Self::AwaitingFirstCompletion | Self::Draining if depth == 0 => Self::Drained,
            Self::AwaitingFirstCompletion | Self::Draining => Self::Draining,
            Self::Drained => Self::Drained,
        }
    }
}

/// Counts progress markers owed for a number of compiled methods.
#[derive(Debug, Clone, Copy)]
struct ProgressMarkers {
    step: u64,
    emitted: u64,
}

impl ProgressMarkers {
    fn new(step: u64) -> Self {
        Self { step, emitted: 0 }
    }

    /// Markers newly due for `compiled` methods.
    fn catch_up(&mut self, compiled: u64) -> u64 {
        let target = compiled.checked_div(self.step).unwrap_or(0);
        let due = target.saturating_sub(self.emitted);
        self.emitted = self.emitted.max(target);
        due
    }
}

/// Summary of a finished bootstrap run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Methods in the seed set, before filtering.
    pub seeds_considered: usize,
    /// Seed tasks accepted by the queue.
    pub submitted: usize,
    pub methods_compiled: u64,
    pub elapsed: Duration,
    /// Queue-depth samples taken by the drain loop.
    pub polls: u64,
    pub progress_markers: u64,
}

impl std::fmt::Display for BootstrapReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            " in {} ms (compiled {} methods)",
            self.elapsed.as_millis(),
            self.methods_compiled
        )
    }
}

/// Runs the one-time self warm-up and gates unsafe requests while it is active.
pub struct BootstrapOrchestrator {
    state: Arc<StateCell>,
    counters: Arc<BootstrapCounters>,
    queue: Arc<dyn CompileQueue>,
    compiler: Arc<dyn ManagedCompiler>,
    ids: Arc<CompileIdSequence>,
    config: BootstrapConfig,
    interpreter_only: bool,
}

impl BootstrapOrchestrator {
    pub fn new(
        state: Arc<StateCell>,
        counters: Arc<BootstrapCounters>,
        queue: Arc<dyn CompileQueue>,
        compiler: Arc<dyn ManagedCompiler>,
        ids: Arc<CompileIdSequence>,
        config: BootstrapConfig,
        interpreter_only: bool,
    ) -> Self {
        Self {
            state,
            counters,
            queue,
            compiler,
            ids,
            config,
            interpreter_only,
        }
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.state.is_bootstrapping()
    }

    /// Seed the compile queue, block until it drains, then switch to steady state.
    ///
    /// Only the first call on an `Initialized` compiler does any work; any
    /// other call returns [`BootstrapError::InvalidState`] without side effects.
    /// Individual seed failures never abort bootstrap.
    pub fn run(&self, seed_set: &[Arc<MethodRef>]) -> Result<BootstrapReport, BootstrapError> {
        let found = self.state.get();
        if found != CompilerState::Initialized {
            return Err(BootstrapError::InvalidState(found));
        }

        if self.interpreter_only {
            self.state
                .transition(CompilerState::Initialized, CompilerState::SteadyState)
                .map_err(|e| BootstrapError::InvalidState(e.found))?;
            info!("Interpreter-only mode, skipping compiler bootstrap");
            return Ok(BootstrapReport {
                seeds_considered: seed_set.len(),
                ..Default::default()
            });
        }

        // Dispatch is rejected while Initialized, so no worker can write the
        // counters between this reset and the transition.
        self.counters.reset();
        self.state
            .transition(CompilerState::Initialized, CompilerState::Bootstrapping)
            .map_err(|e| BootstrapError::InvalidState(e.found))?;

        let start = Instant::now();
        info!(seeds = seed_set.len(), "Bootstrapping compiler");
        self.print(format_args!("Bootstrapping compiler"));

        let submitted = self.seed(seed_set);
        let (polls, progress_markers) = if submitted == 0 {
            warn!("No bootstrap candidates in seed set, nothing to drain");
            (0, 0)
        } else {
            self.drain()
        };

        let report = BootstrapReport {
            seeds_considered: seed_set.len(),
            submitted,
            methods_compiled: self.counters.methods_compiled(),
            elapsed: start.elapsed(),
            polls,
            progress_markers,
        };

        if let Err(e) = self
            .state
            .transition(CompilerState::Bootstrapping, CompilerState::SteadyState)
        {
            error!(error = %e, "Compiler state changed during bootstrap");
        }

        self.print(format_args!("{report}\n"));
        info!(
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            methods_compiled = report.methods_compiled,
            submitted = report.submitted,
            "Bootstrap finished"
        );

        if let Err(e) = self.compiler.bootstrap_finished() {
            error!(exception = %e.description, "Managed compiler failed to finish bootstrap");
        }

        Ok(report)
    }

    fn seed(&self, seed_set: &[Arc<MethodRef>]) -> usize {
        let mut submitted: usize = 0;
        for method in seed_set.iter().filter(|m| m.is_bootstrap_candidate()) {
            let task = CompileTask::new(
                self.ids.next_id(),
                Arc::clone(method),
                EntryKind::Normal,
                self.config.tier,
                self.config.hot_count,
                self.config.reason.as_str(),
            );
            match self.queue.enqueue(task) {
                Ok(()) => submitted = submitted.saturating_add(1),
                Err(e) => warn!(method = %method, error = %e, "Failed to submit bootstrap task"),
            }
        }
        debug!(submitted, "Seeded bootstrap compile queue");
        submitted
    }

    /// Poll until the queue drains. Returns (polls, progress markers emitted).
    fn drain(&self) -> (u64, u64) {
        let mut phase = DrainPhase::AwaitingFirstCompletion;
        let mut progress = ProgressMarkers::new(self.config.progress_step);
        let mut polls: u64 = 0;

        while phase != DrainPhase::Drained {
            thread::sleep(self.config.poll_interval);
            polls = polls.saturating_add(1);

            let depth = self.queue.queue_depth(self.config.tier);
            phase = phase.observe(depth, self.counters.request_handled());
            trace!(depth, ?phase, "Bootstrap poll");

            if phase != DrainPhase::AwaitingFirstCompletion {
                let compiled = self.counters.methods_compiled();
                let due = progress.catch_up(compiled);
                if due > 0 {
                    debug!(methods_compiled = compiled, "Bootstrap progress");
                    self.print(format_args!("{}", ".".repeat(usize::try_from(due).unwrap_or(0))));
                }
            }
        }
        (polls, progress.emitted)
    }

    fn print(&self, args: std::fmt::Arguments<'_>) {
        if !self.config.print_bootstrap {
            return;
        }
        let mut out = std::io::stdout().lock();
        let _ = out.write_fmt(args);
        let _ = out.flush();
    }
}

impl std::fmt::Debug for BootstrapOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapOrchestrator")
            .field("state", &self.state.get())
            .field("config", &self.config)
            .field("interpreter_only", &self.interpreter_only)
            .finish_non_exhaustive()
    }
}
