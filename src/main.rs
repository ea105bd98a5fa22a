//! Main entry point for the dysbiosis-profiler application.
//!
//! Parses arguments, initialises logging and hands over to the CLI layer.

use clap::Parser;
use dysbiosis_profiler::cli::{run_cli, Cli};
use env_logger::{Builder, Env};
use log::error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    Builder::from_env(Env::default().default_filter_or(default_level)).init();

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
