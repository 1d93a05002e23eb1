//! ## ipam-cli
//! **Command-line front end for the address management engine**
//!
//! Every invocation opens the configured store once, runs one pool or
//! allocation command and prints the result as JSON.

use clap::Parser;
use ipam_telemetry::logging::EventLogger;

mod commands;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_ref())?;
    EventLogger::init(&config.telemetry);

    commands::run_command(cli, &config)
}
