use std::{fmt::Display, path::PathBuf, str::FromStr};

use clap::{ArgAction, Parser as ClapParser, Subcommand as ClapSubcommand, ValueEnum};
use jitbridge::jit::optimizer::{BitScanForwardNode, Canonical, Constant, ValueNode};
use tracing::{Level, info};

use crate::config::load_config;
use crate::simulation;

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "jitbridge",
    version,
    about = "Simulate a host runtime driving the managed compiler bridge"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Option<Subcommand>,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "config",
        value_name = "CONFIG_FILE",
        help = "TOML simulation file with [bridge], [[seed]], [[script]] and [[request]] tables.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_CONFIG"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "workers",
        value_name = "COUNT",
        help = "Number of compile worker threads.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_WORKERS"
    )]
    pub workers: Option<usize>,
    #[arg(
        long = "poll-interval-ms",
        value_name = "MILLISECONDS",
        help = "Sleep between two bootstrap queue polls.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_POLL_INTERVAL_MS"
    )]
    pub poll_interval_ms: Option<u64>,
    #[arg(
        long = "print-bootstrap",
        value_name = "BOOL",
        help = "Print bootstrap progress dots and the summary line to stdout.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_PRINT_BOOTSTRAP"
    )]
    pub print_bootstrap: Option<bool>,
    #[arg(
        long = "interpreter-only",
        action = ArgAction::SetTrue,
        help = "Run without compiling: bootstrap is skipped.",
        help_heading = "Bridge options",
        env = "JITBRIDGE_INTERPRETER_ONLY"
    )]
    pub interpreter_only: bool,
    #[arg(
        long = "log.level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "JITBRIDGE_LOG_LEVEL",
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error",
        help_heading = "Log options")]
    pub log_level: Level,
    #[arg(
        long = "log.color",
        default_value_t = LogColor::Auto,
        help = "Output logs with ANSI color codes.",
        long_help = "Possible values: auto, always, never",
        help_heading = "Log options",
        env = "JITBRIDGE_LOG_COLOR"
    )]
    pub log_color: LogColor,
    #[arg(
        long = "log.dir",
        value_name = "LOG_DIR",
        help = "Directory to store log files.",
        help_heading = "Log options",
        env = "JITBRIDGE_LOG_DIR"
    )]
    pub log_dir: Option<PathBuf>,
}

#[derive(ClapSubcommand, Debug, Clone)]
pub enum Subcommand {
    #[command(
        name = "bootstrap",
        about = "Bootstrap the compiler and replay configured requests (default)"
    )]
    Bootstrap,
    #[command(
        name = "scan",
        about = "Fold a bit-scan-forward of a constant operand"
    )]
    Scan {
        #[arg(allow_negative_numbers = true, value_name = "VALUE")]
        value: i64,
        #[arg(long = "width", value_enum, default_value_t = Width::Long)]
        width: Width,
    },
}

/// Operand width for `scan`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Int,
    Long,
}

impl Subcommand {
    pub fn run(self, opts: &Options) -> eyre::Result<()> {
        match self {
            Subcommand::Bootstrap => {
                let mut config =
                    load_config(opts.config.as_deref()).map_err(|e| eyre::eyre!(e))?;
                config.apply_overrides(
                    opts.workers,
                    opts.poll_interval_ms,
                    opts.print_bootstrap,
                    opts.interpreter_only,
                );
                config.validate().map_err(|e| eyre::eyre!(e))?;

                let summary = simulation::run(&config)?;
                info!(
                    methods_compiled = summary.methods_compiled,
                    requests = summary.requests_submitted,
                    installed = summary.requests_installed,
                    dispatches = summary.metrics.dispatches,
                    failures = summary.metrics.failures,
                    exceptions = summary.metrics.exceptions,
                    "Simulation finished"
                );
                println!("{}", summary.timers);
            }
            Subcommand::Scan { value, width } => {
                let constant = match width {
                    Width::Int => Constant::Int(i32::try_from(value)?),
                    Width::Long => Constant::Long(value),
                };
                let node = BitScanForwardNode::new(ValueNode::Constant(constant));
                match node.canonical() {
                    Canonical::Literal(Constant::Int(index)) => println!("{index}"),
                    other => eyre::bail!("constant operand did not fold: {other:?}"),
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum LogColor {
    #[default]
    Auto,
    Always,
    Never,
}

impl Display for LogColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogColor::Auto => write!(f, "auto"),
            LogColor::Always => write!(f, "always"),
            LogColor::Never => write!(f, "never"),
        }
    }
}

impl FromStr for LogColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(LogColor::Auto),
            "always" => Ok(LogColor::Always),
            "never" => Ok(LogColor::Never),
            _ => Err(format!(
                "Invalid log color '{s}'. Expected: auto, always, or never"
            )),
        }
    }
}
