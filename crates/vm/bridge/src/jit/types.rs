//! Compile-bridge types.
//!
//! Core data structures shared by the dispatcher, the bootstrap orchestrator
//! and the compile queue. All types are lightweight: no dependencies beyond
//! std and serde.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::StateTransitionError;

/// Entry bci of a normal method invocation (anything else is an OSR entry).
pub const INVOCATION_ENTRY_BCI: i32 = -1;

/// Failure reason recorded when the managed side throws past its own handlers.
pub const EXCEPTION_THROWN_REASON: &str = "exception throw";

/// Failure reason recorded when a successful outcome attached no artifact.
pub const NO_ARTIFACT_REASON: &str = "no artifact produced";

// ─── Compiler state ──────────────────────────────────────────────────

/// Lifecycle of the process-wide compiler instance.
///
/// Transitions are monotonic: `Uninitialized → Initialized → Bootstrapping →
/// SteadyState`. Interpreter-only runs skip `Bootstrapping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompilerState {
    Uninitialized,
    Initialized,
    Bootstrapping,
    SteadyState,
}

impl CompilerState {
    fn to_raw(self) -> u8 {
        match self {
            Self::Uninitialized => 0,
            Self::Initialized => 1,
            Self::Bootstrapping => 2,
            Self::SteadyState => 3,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Initialized,
            2 => Self::Bootstrapping,
            3 => Self::SteadyState,
            _ => Self::Uninitialized,
        }
    }

    /// Whether compile requests may be dispatched in this state.
    pub fn accepts_requests(self) -> bool {
        matches!(self, Self::Bootstrapping | Self::SteadyState)
    }
}

/// Lock-free holder of the [`CompilerState`].
///
/// Readers never block; writers move the state with compare-and-set so each
/// transition happens at most once even when racing callers attempt it.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(CompilerState::Uninitialized.to_raw()))
    }

    pub fn get(&self) -> CompilerState {
        CompilerState::from_raw(self.0.load(Ordering::Acquire))
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.get() == CompilerState::Bootstrapping
    }

    /// Move from `from` to `to`, failing if the current state is not `from`.
    pub fn transition(
        &self,
        from: CompilerState,
        to: CompilerState,
    ) -> Result<(), StateTransitionError> {
        self.0
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|raw| StateTransitionError {
                from,
                to,
                found: CompilerState::from_raw(raw),
            })
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Method identity ─────────────────────────────────────────────────

/// Opaque VM-side method identifier (a metadata pointer on the native side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodId(pub u64);

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Method metadata as seen by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub id: MethodId,
    /// Declaring class, e.g. `java.lang.Object`.
    pub holder: String,
    pub name: String,
    pub signature: String,
    #[serde(default)]
    pub is_native: bool,
    #[serde(default)]
    pub is_static: bool,
}

impl MethodRef {
    pub fn new(
        id: u64,
        holder: impl Into<String>,
        name: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id: MethodId(id),
            holder: holder.into(),
            name: name.into(),
            signature: signature.into(),
            is_native: false,
            is_static: false,
        }
    }

    /// Mark the method as native.
    pub fn native(mut self) -> Self {
        self.is_native = true;
        self
    }

    /// Mark the method as static.
    pub fn static_method(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Instance (`<init>`) or class (`<clinit>`) initializer.
    pub fn is_initializer(&self) -> bool {
        self.name == "<init>" || self.name == "<clinit>"
    }

    /// Whether bootstrap may compile this method.
    pub fn is_bootstrap_candidate(&self) -> bool {
        !self.is_native && !self.is_static && !self.is_initializer()
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.holder, self.name, self.signature)
    }
}

// ─── Compile tasks ───────────────────────────────────────────────────

/// Where compiled code is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular method entry.
    Normal,
    /// On-stack replacement at the given loop-header bci.
    OnStackReplacement { bci: i32 },
}

impl EntryKind {
    pub fn from_bci(bci: i32) -> Self {
        if bci == INVOCATION_ENTRY_BCI {
            Self::Normal
        } else {
            Self::OnStackReplacement { bci }
        }
    }

    pub fn entry_bci(self) -> i32 {
        match self {
            Self::Normal => INVOCATION_ENTRY_BCI,
            Self::OnStackReplacement { bci } => bci,
        }
    }

    pub fn is_osr(self) -> bool {
        matches!(self, Self::OnStackReplacement { .. })
    }
}

/// Compilation tier a task is queued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileTier {
    Simple,
    FullOptimization,
}

/// Correlation id assigned to every compile task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CompileId(pub u64);

impl fmt::Display for CompileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic source of [`CompileId`]s, starting at 1.
#[derive(Debug, Default)]
pub struct CompileIdSequence(AtomicU64);

impl CompileIdSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next_id(&self) -> CompileId {
        CompileId(self.0.fetch_add(1, Ordering::Relaxed).saturating_add(1))
    }
}

/// One unit of requested compilation work. Immutable once created.
#[derive(Debug, Clone)]
pub struct CompileTask {
    id: CompileId,
    method: Arc<MethodRef>,
    entry: EntryKind,
    tier: CompileTier,
    hot_count: u32,
    reason: String,
}

impl CompileTask {
    pub fn new(
        id: CompileId,
        method: Arc<MethodRef>,
        entry: EntryKind,
        tier: CompileTier,
        hot_count: u32,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id,
            method,
            entry,
            tier,
            hot_count,
            reason: reason.into(),
        }
    }

    pub fn id(&self) -> CompileId {
        self.id
    }

    pub fn method(&self) -> &Arc<MethodRef> {
        &self.method
    }

    pub fn entry(&self) -> EntryKind {
        self.entry
    }

    pub fn tier(&self) -> CompileTier {
        self.tier
    }

    /// Synthetic invocation count used as queue priority.
    pub fn hot_count(&self) -> u32 {
        self.hot_count
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

// ─── Outcomes ────────────────────────────────────────────────────────

/// Structured result object returned by the managed compiler.
///
/// Whether an artifact was produced is not part of this object: the managed
/// side attaches it through the [`crate::jit::dispatch::CompileEnv`] of the
/// request, which is the only source of truth for artifact presence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileOutcome {
    /// Set when compilation failed.
    pub failure_message: Option<String>,
    /// Retry advice accompanying a failure.
    pub retry: bool,
    /// Bytecodes inlined into the produced code.
    pub inlined_bytecodes: u32,
}

impl CompileOutcome {
    pub fn success(inlined_bytecodes: u32) -> Self {
        Self {
            failure_message: None,
            retry: false,
            inlined_bytecodes,
        }
    }

    pub fn failure(message: impl Into<String>, retry: bool) -> Self {
        Self {
            failure_message: Some(message.into()),
            retry,
            inlined_bytecodes: 0,
        }
    }
}

/// Reconciled result of executing one [`CompileTask`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    /// `emitted_code` is false only for requests dropped without compiling
    /// (OSR while bootstrapping).
    Success { emitted_code: bool, inlined_count: u32 },
    /// Retry advice is for the queue; the bridge never retries on its own.
    Failure { reason: String, retryable: bool },
}

impl CompileResult {
    pub fn failure(reason: impl Into<String>, retryable: bool) -> Self {
        Self::Failure {
            reason: reason.into(),
            retryable,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failure { retryable: true, .. })
    }
}

// ─── Configuration ───────────────────────────────────────────────────

/// Tuning for the bootstrap phase.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Sleep between two queue-depth polls.
    pub poll_interval: Duration,
    /// Priority assigned to every seed task.
    pub hot_count: u32,
    /// Compiled methods per progress marker.
    pub progress_step: u64,
    /// Print progress markers and the summary line to stdout.
    pub print_bootstrap: bool,
    /// Reason tag attached to seed tasks.
    pub reason: String,
    /// Tier seed tasks are queued for and whose depth is polled.
    pub tier: CompileTier,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            hot_count: 10,
            progress_step: 100,
            print_bootstrap: false,
            reason: "bootstrap".to_string(),
            tier: CompileTier::FullOptimization,
        }
    }
}

/// Configuration for the compile bridge.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Global "use this compiler" switch; without it `initialize` is a no-op.
    pub use_compiler: bool,
    /// The VM never compiles; bootstrap seeds nothing.
    pub interpreter_only: bool,
    pub bootstrap: BootstrapConfig,
    /// Worker threads of the in-process compile queue.
    pub compile_workers: usize,
    /// Installed-code cache capacity (FIFO eviction beyond it).
    pub max_cache_entries: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            use_compiler: true,
            interpreter_only: false,
            bootstrap: BootstrapConfig::default(),
            compile_workers: 1,
            max_cache_entries: 4096,
        }
    }
}

// ─── Metrics ─────────────────────────────────────────────────────────

/// Cumulative wall-clock time spent attaching artifacts.
///
/// Purely additive; it is never reset after construction.
#[derive(Debug, Default)]
pub struct CodeInstallTimer {
    nanos: AtomicU64,
}

impl CodeInstallTimer {
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    /// Run `f` and add its wall-clock duration to the timer.
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.add(start.elapsed());
        result
    }

    pub fn add(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.nanos.load(Ordering::Relaxed))
    }

    pub fn seconds(&self) -> f64 {
        self.elapsed().as_secs_f64()
    }
}

/// Atomic metrics for dispatch events.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    /// Requests that reached the managed compiler.
    pub dispatches: AtomicU64,
    /// Requests reconciled as a success with an artifact.
    pub successes: AtomicU64,
    /// Requests reconciled as a failure (all kinds).
    pub failures: AtomicU64,
    /// Failures carrying retry advice.
    pub retryable_failures: AtomicU64,
    /// Exceptions contained at the boundary.
    pub exceptions: AtomicU64,
    /// Successful-looking outcomes without an artifact.
    pub missing_artifacts: AtomicU64,
    /// Requests for which the managed side returned no outcome.
    pub missing_outcomes: AtomicU64,
    /// OSR requests dropped while bootstrapping.
    pub osr_suppressed: AtomicU64,
    /// Time spent attaching artifacts.
    pub code_install: CodeInstallTimer,
}

/// Point-in-time copy of [`BridgeMetrics`] counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub dispatches: u64,
    pub successes: u64,
    pub failures: u64,
    pub retryable_failures: u64,
    pub exceptions: u64,
    pub missing_artifacts: u64,
    pub missing_outcomes: u64,
    pub osr_suppressed: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            dispatches: self.dispatches.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            retryable_failures: self.retryable_failures.load(Ordering::Relaxed),
            exceptions: self.exceptions.load(Ordering::Relaxed),
            missing_artifacts: self.missing_artifacts.load(Ordering::Relaxed),
            missing_outcomes: self.missing_outcomes.load(Ordering::Relaxed),
            osr_suppressed: self.osr_suppressed.load(Ordering::Relaxed),
        }
    }
}
