//! Shared test doubles for the compile bridge.
//!
//! `ScriptedCompiler` stands in for the managed compiler and answers every
//! request from a per-method script; `DeferredQueue` hides its tasks from
//! `queue_depth` until a given poll, to reproduce the empty-queue race at
//! bootstrap start; `RecordingQueue` keeps every task it was handed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{ManagedException, QueueError};
use crate::jit::bootstrap::CompileQueue;
use crate::jit::cache::{CodeCache, CompiledArtifact};
use crate::jit::counter::BootstrapCounters;
use crate::jit::dispatch::{
    CompileDispatcher, CompileRequest, ManagedCompiler, ManagedMethodHandle,
};
use crate::jit::types::{
    BootstrapConfig, BridgeConfig, BridgeMetrics, CompileId, CompileOutcome, CompileTask,
    CompileTier, CompilerState, EntryKind, MethodId, MethodRef, StateCell,
};

/// Scripted behavior of the managed compiler for one method.
#[derive(Debug, Clone)]
pub enum Script {
    /// Install an artifact and report success.
    Success { inlined: u32 },
    /// Report an explicit failure message.
    Failure { message: String, retry: bool },
    /// Report success without installing an artifact.
    NoArtifact,
    /// Raise a managed exception during compilation.
    Throw(String),
    /// Raise a managed exception while resolving the method.
    ResolveThrows(String),
    /// Panic inside the compiler implementation.
    Panic(String),
    /// Return no outcome object at all.
    NullOutcome,
}

/// One observed `compile_method` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub method: MethodId,
    pub entry_bci: i32,
    pub compile_id: CompileId,
}

/// Managed-compiler double driven by per-method-name scripts.
#[derive(Debug)]
pub struct ScriptedCompiler {
    scripts: FxHashMap<String, Script>,
    default: Script,
    delay: Duration,
    trivial: FxHashSet<String>,
    fail_bootstrap_finished: bool,
    calls: Mutex<Vec<Call>>,
    bootstrap_finished: AtomicBool,
}

impl Default for ScriptedCompiler {
    fn default() -> Self {
        Self {
            scripts: FxHashMap::default(),
            default: Script::Success { inlined: 0 },
            delay: Duration::ZERO,
            trivial: FxHashSet::default(),
            fail_bootstrap_finished: false,
            calls: Mutex::new(Vec::new()),
            bootstrap_finished: AtomicBool::new(false),
        }
    }
}

impl ScriptedCompiler {
    /// Every method compiles successfully unless scripted otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, method_name: &str, script: Script) -> Self {
        self.scripts.insert(method_name.to_string(), script);
        self
    }

    pub fn with_default(mut self, script: Script) -> Self {
        self.default = script;
        self
    }

    /// Sleep this long inside every compilation.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_trivial(mut self, method_name: &str) -> Self {
        self.trivial.insert(method_name.to_string());
        self
    }

    pub fn failing_bootstrap_finished(mut self) -> Self {
        self.fail_bootstrap_finished = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn bootstrap_finished_called(&self) -> bool {
        self.bootstrap_finished.load(Ordering::Acquire)
    }

    fn script_for(&self, method: &MethodRef) -> &Script {
        self.scripts.get(&method.name).unwrap_or(&self.default)
    }
}

impl ManagedCompiler for ScriptedCompiler {
    fn resolve_method(&self, method: &MethodRef) -> Result<ManagedMethodHandle, ManagedException> {
        if let Script::ResolveThrows(description) = self.script_for(method) {
            return Err(ManagedException::new(description.clone())
                .with_frame("MetaAccess.lookupMethod"));
        }
        Ok(ManagedMethodHandle(method.id.0))
    }

    fn compile_method(
        &self,
        request: &CompileRequest<'_>,
    ) -> Result<Option<CompileOutcome>, ManagedException> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let method = request.env.task().method();
        self.calls.lock().expect("calls lock").push(Call {
            method: method.id,
            entry_bci: request.entry_bci,
            compile_id: request.compile_id,
        });

        match self.script_for(method) {
            Script::Success { inlined } => {
                request
                    .env
                    .install_code(CompiledArtifact {
                        code_size: 64,
                        name: method.to_string(),
                    })
                    .map_err(|e| ManagedException::new(e.to_string()))?;
                Ok(Some(CompileOutcome::success(*inlined)))
            }
            Script::Failure { message, retry } => {
                Ok(Some(CompileOutcome::failure(message.clone(), *retry)))
            }
            Script::NoArtifact => Ok(Some(CompileOutcome::success(0))),
            Script::Throw(description) => Err(ManagedException::new(description.clone())
                .with_frame("GraphBuilder.build")
                .with_frame("Compiler.compileMethod")),
            Script::ResolveThrows(_) => unreachable!("resolution fails before compilation"),
            Script::Panic(message) => panic!("{message}"),
            Script::NullOutcome => Ok(None),
        }
    }

    fn bootstrap_finished(&self) -> Result<(), ManagedException> {
        self.bootstrap_finished.store(true, Ordering::Release);
        if self.fail_bootstrap_finished {
            return Err(ManagedException::new("java.lang.IllegalStateException"));
        }
        Ok(())
    }

    fn treat_as_trivial(&self, method: &MethodRef) -> bool {
        self.trivial.contains(&method.name)
    }
}

/// Upcast a scripted compiler while keeping the concrete handle for assertions.
pub fn managed(compiler: &Arc<ScriptedCompiler>) -> Arc<dyn ManagedCompiler> {
    Arc::<ScriptedCompiler>::clone(compiler)
}

/// Compile queue that reports zero pending tasks and only dispatches what it
/// holds once `release_on_poll` polls have been made.
pub struct DeferredQueue {
    dispatcher: Arc<CompileDispatcher>,
    tasks: Mutex<Vec<CompileTask>>,
    release_on_poll: usize,
    polls: AtomicUsize,
}

impl DeferredQueue {
    pub fn new(dispatcher: Arc<CompileDispatcher>, release_on_poll: usize) -> Self {
        Self {
            dispatcher,
            tasks: Mutex::new(Vec::new()),
            release_on_poll,
            polls: AtomicUsize::new(0),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::Acquire)
    }
}

impl CompileQueue for DeferredQueue {
    fn queue_depth(&self, _tier: CompileTier) -> usize {
        let poll = self.polls.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if poll >= self.release_on_poll {
            let tasks: Vec<_> = self.tasks.lock().expect("tasks lock").drain(..).collect();
            for task in &tasks {
                let _ = self.dispatcher.dispatch(task);
            }
        }
        0
    }

    fn enqueue(&self, task: CompileTask) -> Result<(), QueueError> {
        self.tasks.lock().expect("tasks lock").push(task);
        Ok(())
    }
}

/// Compile queue that dispatches every task as it is enqueued and keeps the
/// tasks it saw, in submission order.
pub struct RecordingQueue {
    dispatcher: Arc<CompileDispatcher>,
    tasks: Mutex<Vec<CompileTask>>,
}

impl RecordingQueue {
    pub fn new(dispatcher: Arc<CompileDispatcher>) -> Self {
        Self {
            dispatcher,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks(&self) -> Vec<CompileTask> {
        self.tasks.lock().expect("tasks lock").clone()
    }
}

impl CompileQueue for RecordingQueue {
    fn queue_depth(&self, _tier: CompileTier) -> usize {
        0
    }

    fn enqueue(&self, task: CompileTask) -> Result<(), QueueError> {
        let _ = self.dispatcher.dispatch(&task);
        self.tasks.lock().expect("tasks lock").push(task);
        Ok(())
    }
}

/// Queue that accepts nothing.
pub struct ClosedQueue;

impl CompileQueue for ClosedQueue {
    fn queue_depth(&self, _tier: CompileTier) -> usize {
        0
    }

    fn enqueue(&self, _task: CompileTask) -> Result<(), QueueError> {
        Err(QueueError::Disconnected)
    }
}

/// Config with a short poll interval so bootstrap tests finish quickly.
pub fn fast_config(workers: usize) -> BridgeConfig {
    BridgeConfig {
        bootstrap: BootstrapConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        },
        compile_workers: workers,
        ..Default::default()
    }
}

/// Plain instance method that passes the bootstrap filter.
pub fn method(id: u64, name: &str) -> Arc<MethodRef> {
    Arc::new(MethodRef::new(id, "jdk.vm.ci.Test", name, "()V"))
}

pub fn task(id: u64, method: Arc<MethodRef>, entry: EntryKind) -> CompileTask {
    CompileTask::new(
        CompileId(id),
        method,
        entry,
        CompileTier::FullOptimization,
        10,
        "test",
    )
}

/// A dispatcher wired to its own shared state, moved into `state`.
pub struct DispatcherFixture {
    pub dispatcher: CompileDispatcher,
    pub state: Arc<StateCell>,
    pub counters: Arc<BootstrapCounters>,
    pub metrics: Arc<BridgeMetrics>,
}

pub fn dispatcher_in(state: CompilerState, compiler: Arc<dyn ManagedCompiler>) -> DispatcherFixture {
    let cell = Arc::new(StateCell::new());
    let path = [
        CompilerState::Initialized,
        CompilerState::Bootstrapping,
        CompilerState::SteadyState,
    ];
    let mut current = CompilerState::Uninitialized;
    for next in path {
        if current == state {
            break;
        }
        cell.transition(current, next).expect("forward transition");
        current = next;
    }

    let counters = Arc::new(BootstrapCounters::new());
    let metrics = Arc::new(BridgeMetrics::new());
    let dispatcher = CompileDispatcher::new(
        Arc::clone(&cell),
        Arc::clone(&counters),
        compiler,
        CodeCache::new(),
        Arc::clone(&metrics),
    );
    DispatcherFixture {
        dispatcher,
        state: cell,
        counters,
        metrics,
    }
}
