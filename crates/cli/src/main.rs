//! jstd-phantom - Main Entry Point
//!
//! Runs JsTestDriver configuration files against a headless PhantomJS
//! capture and exits with the task outcome.

use anyhow::Context;
use clap::Parser;
use jstd_harness::{Console, QuietSwitch, Task, TaskOrchestrator, TaskOutcome};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod args;

use args::Cli;

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let quiet = QuietSwitch::new();
    init_logging(cli.verbose, &quiet);

    info!("jstd-phantom v{}", jstd_common::VERSION);

    let task = match prepare(&cli, quiet) {
        Ok(task) => task,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match TaskOrchestrator::new(task).run_until(shutdown_signal()).await {
        Ok(outcome) => exit_code(&outcome),
        Err(e) => {
            error!("Task failed: {}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging(verbose: bool, quiet: &QuietSwitch) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_filter(quiet.filter()))
        .with(filter)
        .init();
}

/// Configuration errors end the process before anything is spawned
fn prepare(cli: &Cli, quiet: QuietSwitch) -> anyhow::Result<std::sync::Arc<Task>> {
    let config = cli
        .load_config()
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    Task::new("jstd", cli.mode, config.options, config.files, Console::new(quiet))
        .context("Invalid task configuration")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

fn exit_code(outcome: &TaskOutcome) -> ExitCode {
    if outcome.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if outcome.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_FAILURE)
    }
}
