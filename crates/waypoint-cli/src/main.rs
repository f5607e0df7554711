//! Waypoint CLI entry point.
//!
//! Binary name: `waypoint`
//!
//! Parses CLI arguments, initializes tracing, then dispatches to the
//! `validate`, `states` or `run` handler.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use waypoint_observe::tracing_setup::{LogFormat, TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "info,waypoint_core=debug,waypoint_infra=debug",
        _ => "trace",
    };

    init_tracing(&TracingOptions {
        format: if cli.json_logs {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        },
        otel: cli.otel,
        default_filter: filter.to_string(),
    })
    .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let outcome = match cli.command {
        Commands::Validate { file } => cli::validate::handle_validate(&file, cli.json),
        Commands::States { file } => cli::states::handle_states(&file, cli.json),
        Commands::Run(args) => cli::run::handle_run(args, cli.json).await,
    };

    shutdown_tracing();
    outcome
}
