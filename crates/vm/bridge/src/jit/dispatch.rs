//! Compile dispatch.
//!
//! Executes one compile request end-to-end: forwards it across the boundary
//! to the managed compiler, contains anything the managed side throws, and
//! reconciles the returned outcome into a [`CompileResult`] while updating
//! the shared counters.
//!
//! # Result reconciliation
//!
//! | managed side                          | result                                      |
//! |---------------------------------------|---------------------------------------------|
//! | throws / panics                       | `Failure("exception throw", retryable=false)` |
//! | outcome with failure message          | `Failure(message, retryable=outcome.retry)` |
//! | outcome without message, no artifact  | `Failure("no artifact produced", retryable=true)` |
//! | outcome without message, artifact     | `Success`, `methods_compiled += 1`          |
//! | no outcome object                     | `Err(DispatchError::MissingOutcome)`        |

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info, warn};

use super::cache::{CodeCache, CompiledArtifact, InstalledCode};
use super::counter::BootstrapCounters;
use super::types::{
    BridgeMetrics, CodeInstallTimer, CompileId, CompileOutcome, CompileResult, CompileTask,
    CompilerState, EXCEPTION_THROWN_REASON, MethodRef, NO_ARTIFACT_REASON, StateCell,
};
use crate::errors::{DispatchError, InstallError, ManagedException};

/// Managed-side representation of a method, produced by
/// [`ManagedCompiler::resolve_method`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagedMethodHandle(pub u64);

/// Capability for invoking the out-of-process managed compiler.
///
/// The bridge defines this interface; the host runtime provides the
/// implementation. Any `Err` or panic raised by an implementation is
/// contained by the dispatcher and never reaches the compile worker.
pub trait ManagedCompiler: Send + Sync {
    /// Look up or construct the managed handle for a VM method.
    fn resolve_method(&self, method: &MethodRef) -> Result<ManagedMethodHandle, ManagedException>;

    /// Compile one method.
    ///
    /// A produced artifact must be attached through `request.env`. Returning
    /// `Ok(None)` means the managed side produced no outcome object at all,
    /// which the bridge treats as an assertion violation.
    fn compile_method(
        &self,
        request: &CompileRequest<'_>,
    ) -> Result<Option<CompileOutcome>, ManagedException>;

    /// Called once after bootstrap drained the compile queue.
    fn bootstrap_finished(&self) -> Result<(), ManagedException> {
        Ok(())
    }

    /// Whether the managed side considers `method` trivial enough to skip
    /// optimized compilation.
    fn treat_as_trivial(&self, _method: &MethodRef) -> bool {
        false
    }
}

/// Arguments passed across the boundary for one compilation.
#[derive(Debug)]
pub struct CompileRequest<'a> {
    pub method: ManagedMethodHandle,
    pub entry_bci: i32,
    /// Correlation id of the originating task.
    pub compile_id: CompileId,
    /// Where the resulting artifact is attached.
    pub env: &'a CompileEnv<'a>,
}

/// Per-request compilation environment.
///
/// Holds the attachment point for the produced artifact. Installing goes
/// through the shared [`CodeCache`] and is timed by the process-wide
/// code-install timer.
#[derive(Debug)]
pub struct CompileEnv<'a> {
    task: &'a CompileTask,
    cache: &'a CodeCache,
    install_timer: &'a CodeInstallTimer,
    installed: OnceLock<Arc<InstalledCode>>,
}

impl<'a> CompileEnv<'a> {
    pub fn new(
        task: &'a CompileTask,
        cache: &'a CodeCache,
        install_timer: &'a CodeInstallTimer,
    ) -> Self {
        Self {
            task,
            cache,
            install_timer,
            installed: OnceLock::new(),
        }
    }

    pub fn task(&self) -> &CompileTask {
        self.task
    }

    /// Attach the artifact for this request. At most one artifact per request.
    pub fn install_code(
        &self,
        artifact: CompiledArtifact,
    ) -> Result<Arc<InstalledCode>, InstallError> {
        self.install_timer.time(|| -> Result<Arc<InstalledCode>, InstallError> {
            let code = Arc::new(InstalledCode {
                method: self.task.method().id,
                entry_bci: self.task.entry().entry_bci(),
                compile_id: self.task.id(),
                code_size: artifact.code_size,
                name: artifact.name,
            });
            self.installed
                .set(Arc::clone(&code))
                .map_err(|_| InstallError::AlreadyInstalled(self.task.id()))?;
            self.cache.insert(Arc::clone(&code));
            Ok(code)
        })
    }

    pub fn installed_code(&self) -> Option<&Arc<InstalledCode>> {
        self.installed.get()
    }

    pub fn artifact_present(&self) -> bool {
        self.installed.get().is_some()
    }
}

/// Steady-state entry point invoked once per compile request.
pub struct CompileDispatcher {
    state: Arc<StateCell>,
    counters: Arc<BootstrapCounters>,
    compiler: Arc<dyn ManagedCompiler>,
    cache: CodeCache,
    metrics: Arc<BridgeMetrics>,
}

impl CompileDispatcher {
    pub fn new(
        state: Arc<StateCell>,
        counters: Arc<BootstrapCounters>,
        compiler: Arc<dyn ManagedCompiler>,
        cache: CodeCache,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            state,
            counters,
            compiler,
            cache,
            metrics,
        }
    }

    /// Execute `task` and reconcile its result.
    ///
    /// While bootstrapping, OSR requests are dropped and reported as a
    /// success that emitted no code. Every other request that reaches the
    /// managed side marks the bootstrap request-handled flag, whatever its
    /// result.
    pub fn dispatch(&self, task: &CompileTask) -> Result<CompileResult, DispatchError> {
        let state = self.state.get();
        if !state.accepts_requests() {
            return Err(DispatchError::NotReady(state));
        }

        if state == CompilerState::Bootstrapping && task.entry().is_osr() {
            debug!(
                compile_id = %task.id(),
                method = %task.method(),
                entry_bci = task.entry().entry_bci(),
                "Dropping OSR request during bootstrap"
            );
            self.metrics.osr_suppressed.fetch_add(1, Ordering::Relaxed);
            return Ok(CompileResult::Success {
                emitted_code: false,
                inlined_count: 0,
            });
        }

        self.metrics.dispatches.fetch_add(1, Ordering::Relaxed);
        let env = CompileEnv::new(task, &self.cache, &self.metrics.code_install);
        let invoked = self.invoke(task, &env);
        let result = self.reconcile(task, &env, invoked);

        if self.state.is_bootstrapping() {
            self.counters.mark_request_handled();
        }
        result
    }

    /// Whether `method` may be skipped as trivial. Never while bootstrapping:
    /// bootstrap must compile the whole seed set.
    pub fn is_trivial(&self, method: &MethodRef) -> bool {
        if self.state.is_bootstrapping() {
            return false;
        }
        self.compiler.treat_as_trivial(method)
    }

    pub fn cache(&self) -> &CodeCache {
        &self.cache
    }

    fn invoke(
        &self,
        task: &CompileTask,
        env: &CompileEnv<'_>,
    ) -> Result<Option<CompileOutcome>, ManagedException> {
        let compiler = &self.compiler;
        panic::catch_unwind(AssertUnwindSafe(|| {
            let method = compiler.resolve_method(task.method())?;
            let request = CompileRequest {
                method,
                entry_bci: task.entry().entry_bci(),
                compile_id: task.id(),
                env,
            };
            compiler.compile_method(&request)
        }))
        .unwrap_or_else(|payload| Err(ManagedException::from_panic(payload)))
    }

    fn reconcile(
        &self,
        task: &CompileTask,
        env: &CompileEnv<'_>,
        invoked: Result<Option<CompileOutcome>, ManagedException>,
    ) -> Result<CompileResult, DispatchError> {
        let outcome = match invoked {
            Ok(Some(outcome)) => outcome,
            Ok(None) => {
                error!(
                    compile_id = %task.id(),
                    method = %task.method(),
                    "Managed compiler returned no outcome"
                );
                self.metrics.missing_outcomes.fetch_add(1, Ordering::Relaxed);
                return Err(DispatchError::MissingOutcome(task.id()));
            }
            Err(exception) => {
                error!(
                    compile_id = %task.id(),
                    method = %task.method(),
                    exception = %exception.description,
                    "Uncaught exception during compilation"
                );
                for frame in &exception.stack_trace {
                    error!(compile_id = %task.id(), "\tat {frame}");
                }
                self.metrics.exceptions.fetch_add(1, Ordering::Relaxed);
                return Ok(self.failed(CompileResult::failure(EXCEPTION_THROWN_REASON, false)));
            }
        };

        if let Some(message) = outcome.failure_message {
            warn!(
                compile_id = %task.id(),
                method = %task.method(),
                reason = %message,
                retryable = outcome.retry,
                "Compilation failed"
            );
            return Ok(self.failed(CompileResult::failure(message, outcome.retry)));
        }

        if !env.artifact_present() {
            error!(
                compile_id = %task.id(),
                method = %task.method(),
                "Compilation reported success but attached no artifact"
            );
            self.metrics.missing_artifacts.fetch_add(1, Ordering::Relaxed);
            return Ok(self.failed(CompileResult::failure(NO_ARTIFACT_REASON, true)));
        }

        let total = self.counters.record_compiled();
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        info!(
            compile_id = %task.id(),
            method = %task.method(),
            inlined_bytecodes = outcome.inlined_bytecodes,
            methods_compiled = total,
            "Compiled method"
        );
        Ok(CompileResult::Success {
            emitted_code: true,
            inlined_count: outcome.inlined_bytecodes,
        })
    }

    fn failed(&self, result: CompileResult) -> CompileResult {
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        if result.is_retryable() {
            self.metrics
                .retryable_failures
                .fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

impl std::fmt::Debug for CompileDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileDispatcher")
            .field("state", &self.state.get())
            .field("methods_compiled", &self.counters.methods_compiled())
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::types::{CompileTier, EntryKind, MethodId};

    fn task() -> CompileTask {
        CompileTask::new(
            CompileId(9),
            Arc::new(MethodRef::new(0x40, "java.lang.Object", "equals", "(Ljava/lang/Object;)Z")),
            EntryKind::Normal,
            CompileTier::FullOptimization,
            10,
            "test",
        )
    }

    #[test]
    fn test_env_installs_once_and_times_install() {
        let task = task();
        let cache = CodeCache::new();
        let timer = CodeInstallTimer::new();
        let env = CompileEnv::new(&task, &cache, &timer);
        assert!(!env.artifact_present());

        let installed = env
            .install_code(CompiledArtifact {
                code_size: 256,
                name: "equals".to_string(),
            })
            .expect("first install succeeds");
        assert_eq!(installed.compile_id, CompileId(9));
        assert!(env.artifact_present());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&(MethodId(0x40), -1)).is_some());

        let second = env.install_code(CompiledArtifact {
            code_size: 1,
            name: "again".to_string(),
        });
        assert_eq!(second, Err(InstallError::AlreadyInstalled(CompileId(9))));
        assert_eq!(
            env.installed_code().map(|c| c.code_size),
            Some(256),
            "first artifact stays attached"
        );
    }
}
