//! TOML configuration for a simulated host runtime.
//!
//! ```toml
//! [bridge]
//! compile_workers = 4
//! poll_interval_ms = 20
//! print_bootstrap = true
//!
//! [[seed]]
//! id = 1
//! holder = "jdk.vm.ci.hotspot.HotSpotMethod"
//! name = "getName"
//! signature = "()Ljava/lang/String;"
//!
//! [[script]]
//! method = "getName"
//! outcome = "failure"
//! message = "timeout"
//! retry = true
//!
//! [[request]]
//! id = 2
//! holder = "app.Main"
//! name = "loop"
//! signature = "()V"
//! entry_bci = 12
//! ```

use std::path::Path;
use std::time::Duration;

use jitbridge::jit::types::{BootstrapConfig, BridgeConfig, CompileTier, EntryKind, MethodRef};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Full simulation description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub bridge: BridgeSection,
    /// Bootstrap seed set. Empty means the root object method table.
    pub seed: Vec<MethodRef>,
    /// Scripted managed-compiler behavior, keyed by method name.
    pub script: Vec<ScriptEntry>,
    /// Steady-state requests replayed after bootstrap.
    pub request: Vec<RequestEntry>,
}

/// `[bridge]` table, mapped onto [`BridgeConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSection {
    pub use_compiler: bool,
    pub interpreter_only: bool,
    pub compile_workers: usize,
    pub max_cache_entries: usize,
    pub poll_interval_ms: u64,
    pub hot_count: u32,
    pub progress_step: u64,
    pub print_bootstrap: bool,
}

impl Default for BridgeSection {
    fn default() -> Self {
        let bridge = BridgeConfig::default();
        Self {
            use_compiler: bridge.use_compiler,
            interpreter_only: bridge.interpreter_only,
            compile_workers: bridge.compile_workers,
            max_cache_entries: bridge.max_cache_entries,
            poll_interval_ms: u64::try_from(bridge.bootstrap.poll_interval.as_millis())
                .unwrap_or(100),
            hot_count: bridge.bootstrap.hot_count,
            progress_step: bridge.bootstrap.progress_step,
            print_bootstrap: true,
        }
    }
}

/// What the simulated managed compiler does for a method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    #[default]
    Success,
    Failure,
    NoArtifact,
    Throw,
    NullOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptEntry {
    /// Method name the script applies to.
    pub method: String,
    pub outcome: OutcomeKind,
    /// Failure message or exception description.
    pub message: Option<String>,
    pub retry: bool,
    pub inlined: u32,
    /// Simulated compile time.
    pub delay_ms: u64,
    pub trivial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEntry {
    #[serde(flatten)]
    pub method: MethodRef,
    /// OSR entry bci; absent for a normal entry.
    #[serde(default)]
    pub entry_bci: Option<i32>,
    #[serde(default = "default_tier")]
    pub tier: CompileTier,
}

impl RequestEntry {
    pub fn entry(&self) -> EntryKind {
        self.entry_bci.map_or(EntryKind::Normal, EntryKind::from_bci)
    }
}

fn default_tier() -> CompileTier {
    CompileTier::FullOptimization
}

impl SimulationConfig {
    pub fn to_bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            use_compiler: self.bridge.use_compiler,
            interpreter_only: self.bridge.interpreter_only,
            compile_workers: self.bridge.compile_workers,
            max_cache_entries: self.bridge.max_cache_entries,
            bootstrap: BootstrapConfig {
                poll_interval: Duration::from_millis(self.bridge.poll_interval_ms),
                hot_count: self.bridge.hot_count,
                progress_step: self.bridge.progress_step,
                print_bootstrap: self.bridge.print_bootstrap,
                ..Default::default()
            },
        }
    }

    /// Validate configuration values, returning an error message on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.bridge.compile_workers == 0 {
            return Err("bridge.compile_workers must be at least 1".to_string());
        }
        if self.bridge.poll_interval_ms == 0 {
            return Err("bridge.poll_interval_ms must be greater than 0".to_string());
        }
        if self.bridge.progress_step == 0 {
            return Err("bridge.progress_step must be greater than 0".to_string());
        }

        let mut seen = FxHashSet::default();
        for entry in &self.script {
            if !seen.insert(entry.method.as_str()) {
                return Err(format!("duplicate script for method '{}'", entry.method));
            }
            let needs_message = matches!(entry.outcome, OutcomeKind::Failure | OutcomeKind::Throw);
            if needs_message && entry.message.as_deref().is_none_or(str::is_empty) {
                return Err(format!(
                    "script for '{}' needs a message for outcome {:?}",
                    entry.method, entry.outcome
                ));
            }
        }
        Ok(())
    }

    /// CLI flags take precedence over file values.
    pub fn apply_overrides(
        &mut self,
        workers: Option<usize>,
        poll_interval_ms: Option<u64>,
        print_bootstrap: Option<bool>,
        interpreter_only: bool,
    ) {
        if let Some(workers) = workers {
            self.bridge.compile_workers = workers;
        }
        if let Some(ms) = poll_interval_ms {
            self.bridge.poll_interval_ms = ms;
        }
        if let Some(print) = print_bootstrap {
            self.bridge.print_bootstrap = print;
        }
        if interpreter_only {
            self.bridge.interpreter_only = true;
        }
    }
}

/// Load a `SimulationConfig` from an optional TOML file path.
///
/// If `path` is `None`, returns the default config.
pub fn load_config(path: Option<&Path>) -> Result<SimulationConfig, String> {
    let Some(path) = path else {
        return Ok(SimulationConfig::default());
    };

    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read simulation config from {}: {e}", path.display()))?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<SimulationConfig, String> {
    let config: SimulationConfig =
        toml::from_str(contents).map_err(|e| format!("Failed to parse simulation config: {e}"))?;
    config.validate()?;
    Ok(config)
}
