//! Simulated host runtime.
//!
//! Wires a [`BridgeContext`] to a [`SimulatedCompiler`] that answers from the
//! configured scripts, runs bootstrap and replays steady-state requests.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use eyre::{WrapErr, eyre};
use jitbridge::errors::ManagedException;
use jitbridge::jit::bootstrap::BootstrapReport;
use jitbridge::jit::cache::CompiledArtifact;
use jitbridge::jit::context::{BridgeContext, root_object_methods};
use jitbridge::jit::dispatch::{CompileRequest, ManagedCompiler, ManagedMethodHandle};
use jitbridge::jit::types::{CompileOutcome, CompileTier, MethodRef, MetricsSnapshot};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::config::{OutcomeKind, ScriptEntry, SimulationConfig};

/// Longest time to wait for replayed requests to finish.
const REQUEST_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Managed compiler stand-in driven by [`ScriptEntry`]s.
///
/// Methods without a script compile successfully.
#[derive(Debug, Default)]
pub struct SimulatedCompiler {
    scripts: FxHashMap<String, ScriptEntry>,
}

impl SimulatedCompiler {
    pub fn new(scripts: &[ScriptEntry]) -> Self {
        Self {
            scripts: scripts
                .iter()
                .map(|s| (s.method.clone(), s.clone()))
                .collect(),
        }
    }
}

impl ManagedCompiler for SimulatedCompiler {
    fn resolve_method(&self, method: &MethodRef) -> Result<ManagedMethodHandle, ManagedException> {
        Ok(ManagedMethodHandle(method.id.0))
    }

    fn compile_method(
        &self,
        request: &CompileRequest<'_>,
    ) -> Result<Option<CompileOutcome>, ManagedException> {
        let method = request.env.task().method();
        let Some(script) = self.scripts.get(&method.name) else {
            install(request, method)?;
            return Ok(Some(CompileOutcome::success(0)));
        };

        if script.delay_ms > 0 {
            thread::sleep(Duration::from_millis(script.delay_ms));
        }
        let message = script.message.clone().unwrap_or_default();
        match script.outcome {
            OutcomeKind::Success => {
                install(request, method)?;
                Ok(Some(CompileOutcome::success(script.inlined)))
            }
            OutcomeKind::Failure => Ok(Some(CompileOutcome::failure(message, script.retry))),
            OutcomeKind::NoArtifact => Ok(Some(CompileOutcome::success(script.inlined))),
            OutcomeKind::Throw => Err(ManagedException::new(message)
                .with_frame(format!("{}.{}", method.holder, method.name))),
            OutcomeKind::NullOutcome => Ok(None),
        }
    }

    fn treat_as_trivial(&self, method: &MethodRef) -> bool {
        self.scripts
            .get(&method.name)
            .is_some_and(|script| script.trivial)
    }
}

fn install(request: &CompileRequest<'_>, method: &MethodRef) -> Result<(), ManagedException> {
    request
        .env
        .install_code(CompiledArtifact {
            code_size: method.signature.len().saturating_mul(16),
            name: method.to_string(),
        })
        .map(|_| ())
        .map_err(|e| ManagedException::new(e.to_string()))
}

/// What a simulation run did.
#[derive(Debug, Clone)]
pub struct SimulationSummary {
    pub bootstrap: Option<BootstrapReport>,
    pub requests_submitted: usize,
    /// Replayed requests whose code is in the cache after the run.
    pub requests_installed: usize,
    pub methods_compiled: u64,
    pub metrics: MetricsSnapshot,
    pub timers: String,
}

/// Run bootstrap and the configured steady-state requests.
pub fn run(config: &SimulationConfig) -> eyre::Result<SimulationSummary> {
    let compiler: Arc<dyn ManagedCompiler> = Arc::new(SimulatedCompiler::new(&config.script));
    let ctx = BridgeContext::with_worker_pool(config.to_bridge_config(), compiler);

    if !ctx.initialize() {
        warn!("Compiler not initialized, nothing to simulate");
        return Ok(summary(&ctx, None, 0, 0));
    }

    let seeds = if config.seed.is_empty() {
        root_object_methods()
    } else {
        config.seed.iter().cloned().map(Arc::new).collect()
    };
    let report = ctx.bootstrap(&seeds).wrap_err("bootstrap failed")?;

    let mut submitted: usize = 0;
    for request in &config.request {
        ctx.submit(
            Arc::new(request.method.clone()),
            request.entry(),
            request.tier,
            config.bridge.hot_count,
            "simulated",
        )
        .wrap_err_with(|| format!("failed to submit {}", request.method))?;
        submitted = submitted.saturating_add(1);
    }
    let mut installed: usize = 0;
    if submitted > 0 {
        wait_for_drain(&ctx)?;
        installed = config
            .request
            .iter()
            .filter(|r| ctx.installed_code(r.method.id, r.entry()).is_some())
            .count();
        info!(submitted, installed, "Replayed steady-state requests");
    }

    Ok(summary(&ctx, Some(report), submitted, installed))
}

fn wait_for_drain(ctx: &BridgeContext) -> eyre::Result<()> {
    let start = Instant::now();
    let pending = || {
        ctx.queue()
            .queue_depth(CompileTier::Simple)
            .saturating_add(ctx.queue().queue_depth(CompileTier::FullOptimization))
    };
    while pending() > 0 {
        if start.elapsed() >= REQUEST_DRAIN_TIMEOUT {
            return Err(eyre!(
                "{} requests still pending after {REQUEST_DRAIN_TIMEOUT:?}",
                pending()
            ));
        }
        thread::sleep(ctx.config().bootstrap.poll_interval);
    }
    Ok(())
}

fn summary(
    ctx: &BridgeContext,
    bootstrap: Option<BootstrapReport>,
    requests_submitted: usize,
    requests_installed: usize,
) -> SimulationSummary {
    SimulationSummary {
        bootstrap,
        requests_submitted,
        requests_installed,
        methods_compiled: ctx.methods_compiled(),
        metrics: ctx.metrics(),
        timers: ctx.compilation_timers(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use jitbridge::jit::types::CompilerState;

    #[test]
    fn default_simulation_compiles_root_object_candidates() {
        let mut config = SimulationConfig::default();
        config.apply_overrides(Some(2), Some(5), Some(false), false);

        let summary = run(&config).expect("simulation");

        let report = summary.bootstrap.expect("bootstrap ran");
        assert_eq!(report.submitted, 5);
        assert_eq!(summary.methods_compiled, 5);
        assert!(summary.timers.starts_with("code install time:"));
    }

    #[test]
    fn scripted_failures_and_requests() {
        let config = parse_config(
            r#"
            [bridge]
            compile_workers = 2
            poll_interval_ms = 5
            print_bootstrap = false

            [[seed]]
            id = 1
            holder = "jdk.vm.ci.Test"
            name = "a"
            signature = "()V"

            [[seed]]
            id = 2
            holder = "jdk.vm.ci.Test"
            name = "b"
            signature = "()V"

            [[script]]
            method = "b"
            outcome = "no_artifact"

            [[request]]
            id = 3
            holder = "app.Main"
            name = "run"
            signature = "()V"

            [[request]]
            id = 4
            holder = "app.Main"
            name = "b"
            signature = "()V"
            "#,
        )
        .expect("config");

        let summary = run(&config).expect("simulation");

        assert_eq!(summary.requests_submitted, 2);
        assert_eq!(summary.requests_installed, 1);
        assert_eq!(summary.methods_compiled, 2);
        assert_eq!(summary.metrics.missing_artifacts, 2);
    }

    #[test]
    fn disabled_compiler_skips_everything() {
        let mut config = SimulationConfig::default();
        config.bridge.use_compiler = false;

        let summary = run(&config).expect("simulation");

        assert!(summary.bootstrap.is_none());
        assert_eq!(summary.methods_compiled, 0);
    }

    #[test]
    fn simulated_compiler_reports_trivial_scripts() {
        let compiler = SimulatedCompiler::new(&[ScriptEntry {
            method: "get".to_string(),
            trivial: true,
            ..Default::default()
        }]);
        let getter = MethodRef::new(1, "app.Bean", "get", "()I");
        assert!(compiler.treat_as_trivial(&getter));

        let ctx = BridgeContext::with_worker_pool(
            SimulationConfig::default().to_bridge_config(),
            Arc::new(compiler),
        );
        assert!(ctx.initialize());
        ctx.bootstrap(&[]).expect("bootstrap");
        assert_eq!(ctx.state(), CompilerState::SteadyState);
        assert!(ctx.is_trivial(&getter));
    }
}
