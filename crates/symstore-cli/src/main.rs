use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use symstore_store::StoreError;

mod cli;
mod commands;
mod config;
mod logging;
mod output;

const EXIT_GENERAL: u8 = 1;
const EXIT_CONFIG: u8 = 5;
const EXIT_UNEXPECTED: u8 = 6;
const EXIT_FAILURES: u8 = 9;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    if let Err(e) = logging::init_logging(cli.log_level(), cli.log_file.as_deref()) {
        eprintln!("{} {e:#}", "error:".red().bold());
        return ExitCode::from(EXIT_GENERAL);
    }
    match commands::run_command(cli) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            tracing::debug!(failures, "command reported failures");
            ExitCode::from(EXIT_FAILURES)
        }
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<config::ConfigError>().is_some() {
        EXIT_CONFIG
    } else if matches!(err.downcast_ref::<StoreError>(), Some(StoreError::Unexpected(_))) {
        EXIT_UNEXPECTED
    } else {
        EXIT_GENERAL
    }
}
