//! `waypoint validate` -- compile a definition and report problems.

use std::path::Path;
use std::process::ExitCode;

use anyhow::Result;
use console::style;

use waypoint_core::workflow::definition::load_state_machine;

pub fn handle_validate(file: &Path, json: bool) -> Result<ExitCode> {
    match load_state_machine(file) {
        Ok(machine) => {
            if json {
                let out = serde_json::json!({
                    "valid": true,
                    "file": file.display().to_string(),
                    "start_at": machine.start_at(),
                    "states": machine.len(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!(
                    "  {} '{}' is valid",
                    style("*").green().bold(),
                    style(file.display()).cyan()
                );
                if let Some(comment) = machine.comment() {
                    println!("  {}", style(comment).dim());
                }
                println!("  Start: {}", machine.start_at());
                println!("  States: {}", machine.len());
                println!();
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            if json {
                let out = serde_json::json!({
                    "valid": false,
                    "file": file.display().to_string(),
                    "error": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                eprintln!();
                eprintln!(
                    "  {} '{}' is invalid",
                    style("x").red().bold(),
                    style(file.display()).cyan()
                );
                eprintln!("  {err}");
                eprintln!();
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
