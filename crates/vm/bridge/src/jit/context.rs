//! Compile-bridge composition root.
//!
//! [`BridgeContext`] owns the single compiler state, the counters, the code
//! cache and the compile queue, and wires them into one dispatcher and one
//! bootstrap orchestrator. The host runtime constructs exactly one context
//! and hands references to its compile workers.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::bootstrap::{BootstrapOrchestrator, BootstrapReport, CompileQueue};
use super::cache::{CodeCache, InstalledCode};
use super::compiler_thread::CompilerThreadPool;
use super::counter::BootstrapCounters;
use super::dispatch::{CompileDispatcher, ManagedCompiler};
use super::types::{
    BridgeConfig, BridgeMetrics, CompileId, CompileIdSequence, CompileResult, CompileTask,
    CompileTier, CompilerState, EntryKind, MethodId, MethodRef, MetricsSnapshot, StateCell,
};
use crate::errors::{BootstrapError, DispatchError, QueueError};

/// Holder of the process-wide compiler instance.
pub struct BridgeContext {
    config: BridgeConfig,
    state: Arc<StateCell>,
    counters: Arc<BootstrapCounters>,
    metrics: Arc<BridgeMetrics>,
    ids: Arc<CompileIdSequence>,
    compiler: Arc<dyn ManagedCompiler>,
    dispatcher: Arc<CompileDispatcher>,
    queue: Arc<dyn CompileQueue>,
    orchestrator: BootstrapOrchestrator,
}

impl BridgeContext {
    /// Build a context around `compiler`.
    ///
    /// `make_queue` receives the dispatcher so an in-process queue can route
    /// tasks back into it; an external queue may ignore it.
    pub fn new<Q>(config: BridgeConfig, compiler: Arc<dyn ManagedCompiler>, make_queue: Q) -> Self
    where
        Q: FnOnce(Arc<CompileDispatcher>) -> Arc<dyn CompileQueue>,
    {
        let state = Arc::new(StateCell::new());
        let counters = Arc::new(BootstrapCounters::new());
        let metrics = Arc::new(BridgeMetrics::new());
        let ids = Arc::new(CompileIdSequence::new());

        let dispatcher = Arc::new(CompileDispatcher::new(
            Arc::clone(&state),
            Arc::clone(&counters),
            Arc::clone(&compiler),
            CodeCache::with_max_entries(config.max_cache_entries),
            Arc::clone(&metrics),
        ));
        let queue = make_queue(Arc::clone(&dispatcher));

        let orchestrator = BootstrapOrchestrator::new(
            Arc::clone(&state),
            Arc::clone(&counters),
            Arc::clone(&queue),
            Arc::clone(&compiler),
            Arc::clone(&ids),
            config.bootstrap.clone(),
            config.interpreter_only,
        );

        Self {
            config,
            state,
            counters,
            metrics,
            ids,
            compiler,
            dispatcher,
            queue,
            orchestrator,
        }
    }

    /// Build a context whose compile queue is a [`CompilerThreadPool`] of
    /// `config.compile_workers` threads dispatching into this context.
    pub fn with_worker_pool(config: BridgeConfig, compiler: Arc<dyn ManagedCompiler>) -> Self {
        let workers = config.compile_workers;
        Self::new(config, compiler, move |dispatcher| {
            let pool = CompilerThreadPool::start(workers, move |task: CompileTask| {
                match dispatcher.dispatch(&task) {
                    Ok(CompileResult::Failure { reason, retryable }) => debug!(
                        compile_id = %task.id(),
                        reason = %reason,
                        retryable,
                        "Compile task finished with failure"
                    ),
                    Ok(CompileResult::Success { .. }) => {}
                    Err(e) => warn!(compile_id = %task.id(), error = %e, "Compile task rejected"),
                }
            });
            Arc::new(pool)
        })
    }

    /// Move the compiler from `Uninitialized` to `Initialized`.
    ///
    /// Returns true only for the caller that performed the transition. Does
    /// nothing when the compiler is disabled.
    pub fn initialize(&self) -> bool {
        if !self.config.use_compiler {
            debug!("Compiler disabled, skipping initialization");
            return false;
        }
        let initialized = self
            .state
            .transition(CompilerState::Uninitialized, CompilerState::Initialized)
            .is_ok();
        if initialized {
            info!(
                interpreter_only = self.config.interpreter_only,
                workers = self.config.compile_workers,
                "Compiler initialized"
            );
        }
        initialized
    }

    /// Run the bootstrap phase with `seed_set`. Blocks until it completes.
    pub fn bootstrap(&self, seed_set: &[Arc<MethodRef>]) -> Result<BootstrapReport, BootstrapError> {
        self.orchestrator.run(seed_set)
    }

    /// Execute one compile task on the calling thread.
    pub fn dispatch(&self, task: &CompileTask) -> Result<CompileResult, DispatchError> {
        self.dispatcher.dispatch(task)
    }

    /// Create a task for `method` and hand it to the compile queue.
    pub fn submit(
        &self,
        method: Arc<MethodRef>,
        entry: EntryKind,
        tier: CompileTier,
        hot_count: u32,
        reason: &str,
    ) -> Result<CompileId, QueueError> {
        let id = self.ids.next_id();
        self.queue
            .enqueue(CompileTask::new(id, method, entry, tier, hot_count, reason))?;
        Ok(id)
    }

    pub fn state(&self) -> CompilerState {
        self.state.get()
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.orchestrator.is_bootstrapping()
    }

    pub fn is_trivial(&self, method: &MethodRef) -> bool {
        self.dispatcher.is_trivial(method)
    }

    pub fn methods_compiled(&self) -> u64 {
        self.counters.methods_compiled()
    }

    pub fn counters(&self) -> &BootstrapCounters {
        &self.counters
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cumulative compiler timers, one per line.
    pub fn compilation_timers(&self) -> String {
        format!(
            "code install time: {:6.3} s",
            self.metrics.code_install.seconds()
        )
    }

    pub fn cache(&self) -> &CodeCache {
        self.dispatcher.cache()
    }

    /// Code currently installed for `method` at `entry`.
    pub fn installed_code(&self, method: MethodId, entry: EntryKind) -> Option<Arc<InstalledCode>> {
        self.cache().get(&(method, entry.entry_bci()))
    }

    pub fn queue(&self) -> &Arc<dyn CompileQueue> {
        &self.queue
    }

    pub fn compiler(&self) -> &Arc<dyn ManagedCompiler> {
        &self.compiler
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }
}

impl std::fmt::Debug for BridgeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeContext")
            .field("state", &self.state.get())
            .field("config", &self.config)
            .field("methods_compiled", &self.counters.methods_compiled())
            .field("metrics", &self.metrics.snapshot())
            .finish_non_exhaustive()
    }
}

/// Method table of the root object class, used as the default seed set.
///
/// Native, static and initializer entries are kept so the bootstrap filter
/// sees the full table.
pub fn root_object_methods() -> Vec<Arc<MethodRef>> {
    const HOLDER: &str = "java.lang.Object";
    let table = [
        MethodRef::new(0x1000, HOLDER, "<init>", "()V"),
        MethodRef::new(0x1001, HOLDER, "registerNatives", "()V")
            .native()
            .static_method(),
        MethodRef::new(0x1002, HOLDER, "getClass", "()Ljava/lang/Class;").native(),
        MethodRef::new(0x1003, HOLDER, "hashCode", "()I").native(),
        MethodRef::new(0x1004, HOLDER, "equals", "(Ljava/lang/Object;)Z"),
        MethodRef::new(0x1005, HOLDER, "clone", "()Ljava/lang/Object;").native(),
        MethodRef::new(0x1006, HOLDER, "toString", "()Ljava/lang/String;"),
        MethodRef::new(0x1007, HOLDER, "notify", "()V").native(),
        MethodRef::new(0x1008, HOLDER, "notifyAll", "()V").native(),
        MethodRef::new(0x1009, HOLDER, "wait", "(J)V").native(),
        MethodRef::new(0x100a, HOLDER, "wait", "(JI)V"),
        MethodRef::new(0x100b, HOLDER, "wait", "()V"),
        MethodRef::new(0x100c, HOLDER, "finalize", "()V"),
        MethodRef::new(0x100d, HOLDER, "<clinit>", "()V").static_method(),
    ];
    table.into_iter().map(Arc::new).collect()
}
