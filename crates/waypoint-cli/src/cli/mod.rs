//! CLI command definitions for the `waypoint` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod run;
pub mod states;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Validate and run state-machine workflows.
#[derive(Parser)]
#[command(name = "waypoint", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed logs (-v for info, -vv for per-state debug, -vvv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow definition without running it.
    Validate {
        /// Path to the workflow file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// List the states of a workflow and their transitions.
    States {
        /// Path to the workflow file (.json, .yaml or .yml).
        file: PathBuf,
    },

    /// Execute a workflow once against the configured invokers.
    Run(run::RunArgs),
}
