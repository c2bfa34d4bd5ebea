use clap::Parser;
use jitbridge_cmd::{
    cli::{CLI, Subcommand},
    initializers::init_tracing,
};
use tracing::info;

fn main() -> eyre::Result<()> {
    let CLI { opts, command } = CLI::parse();

    let _log_guard = init_tracing(&opts)?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting jitbridge");

    command.unwrap_or(Subcommand::Bootstrap).run(&opts)
}
