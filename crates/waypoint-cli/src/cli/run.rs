//! `waypoint run` -- execute a workflow once.
//!
//! Loads the engine config (missing file means defaults), builds the invoker
//! registry from its routes, runs the workflow against the given input and
//! prints the final context. Ctrl-C cancels the execution.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::Args;
use console::style;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use waypoint_core::workflow::definition::load_state_machine;
use waypoint_core::workflow::interpreter::{ExecutionResult, Interpreter, InterpreterOptions};
use waypoint_infra::config::{DEFAULT_CONFIG_FILE, load_engine_config};
use waypoint_infra::registry::build_registry;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the workflow file (.json, .yaml or .yml).
    pub file: PathBuf,

    /// Read the execution input from a JSON file.
    #[arg(long, conflicts_with = "input_json")]
    pub input: Option<PathBuf>,

    /// Execution input as an inline JSON string.
    #[arg(long)]
    pub input_json: Option<String>,

    /// Engine config file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Override the configured step limit.
    #[arg(long)]
    pub max_steps: Option<u32>,
}

pub async fn handle_run(args: RunArgs, json: bool) -> Result<ExitCode> {
    let machine = load_state_machine(&args.file)
        .with_context(|| format!("Failed to load workflow '{}'", args.file.display()))?;
    let input = read_input(args.input.as_deref(), args.input_json.as_deref()).await?;

    let config = load_engine_config(&args.config).await?;
    let registry = build_registry(&config)?;

    let mut options = InterpreterOptions::from(&config);
    if let Some(max_steps) = args.max_steps {
        if max_steps == 0 {
            bail!("--max-steps must be at least 1");
        }
        options.max_steps = max_steps;
    }

    let interpreter = Interpreter::new(registry).with_options(options);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling execution");
            on_interrupt.cancel();
        }
    });

    let result = interpreter
        .execute_with_cancellation(&machine, &input, cancel)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result_json(&result))?);
    } else {
        print_result(&result)?;
    }

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Input precedence: `--input` file, then `--input-json`, else `{}`.
async fn read_input(file: Option<&Path>, inline: Option<&str>) -> Result<Value> {
    if let Some(path) = file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read input '{}'", path.display()))?;
        return serde_json::from_str(&text)
            .with_context(|| format!("Input '{}' is not valid JSON", path.display()));
    }
    if let Some(text) = inline {
        return serde_json::from_str(text).context("--input-json is not valid JSON");
    }
    Ok(Value::Object(Default::default()))
}

fn result_json(result: &ExecutionResult) -> Value {
    serde_json::json!({
        "execution_id": result.execution_id.to_string(),
        "status": result.status,
        "state": result.state,
        "steps": result.steps,
        "context": result.context,
        "error": result.error.as_ref().map(|e| serde_json::json!({
            "code": e.code(),
            "message": e.to_string(),
        })),
        "history": result.history,
        "started_at": result.started_at,
        "finished_at": result.finished_at,
    })
}

fn print_result(result: &ExecutionResult) -> Result<()> {
    let elapsed = result.finished_at - result.started_at;

    println!();
    match &result.error {
        None => println!(
            "  {} Succeeded at '{}'",
            style("*").green().bold(),
            style(&result.state).cyan()
        ),
        Some(err) => {
            println!(
                "  {} Failed at '{}'",
                style("x").red().bold(),
                style(&result.state).cyan()
            );
            println!("  {}: {}", style(err.code()).red(), err);
        }
    }
    println!("  Execution: {}", style(result.execution_id).dim());
    println!(
        "  Steps: {}  ({} ms)",
        result.steps,
        elapsed.num_milliseconds()
    );

    let path: Vec<&str> = result.history.iter().map(|t| t.state.as_str()).collect();
    if !path.is_empty() {
        println!("  Path: {}", path.join(" -> "));
    }

    println!();
    println!("{}", serde_json::to_string_pretty(&result.context)?);
    println!();
    Ok(())
}
