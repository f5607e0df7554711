//! `waypoint states` -- tabulate a workflow's states and transitions.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use waypoint_core::workflow::definition::{State, StateMachine, load_state_machine};
use waypoint_types::execution::StateKind;

/// One display row per state.
#[derive(Debug, PartialEq)]
struct StateRow {
    name: String,
    kind: StateKind,
    detail: String,
    /// Context paths a Task reads from its `Parameters`.
    reads: Vec<String>,
    next: Vec<String>,
    start: bool,
}

fn state_rows(machine: &StateMachine) -> Vec<StateRow> {
    machine
        .states()
        .map(|(name, state)| {
            let detail = match state {
                State::Task(task) => task.resource.clone(),
                State::Choice(choice) => format!(
                    "{} rule(s), {} condition(s)",
                    choice.choices.len(),
                    choice
                        .choices
                        .iter()
                        .map(|branch| branch.rule.leaf_count())
                        .sum::<usize>()
                ),
                State::Pass(pass) if pass.result.is_some() => "fixed result".to_string(),
                State::Pass(_) => String::new(),
            };
            let reads: Vec<String> = match state {
                State::Task(task) => task
                    .parameters
                    .as_ref()
                    .map(|template| {
                        template
                            .referenced_paths()
                            .into_iter()
                            .map(ToString::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
                _ => Vec::new(),
            };
            StateRow {
                name: name.to_string(),
                kind: state.kind(),
                detail,
                reads,
                next: state.successors().into_iter().map(str::to_string).collect(),
                start: name == machine.start_at(),
            }
        })
        .collect()
}

pub fn handle_states(file: &Path, json: bool) -> Result<ExitCode> {
    let machine = load_state_machine(file)
        .with_context(|| format!("Failed to load workflow '{}'", file.display()))?;
    let rows = state_rows(&machine);

    if json {
        let out: Vec<_> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "name": row.name,
                    "type": row.kind,
                    "detail": row.detail,
                    "reads": row.reads,
                    "next": row.next,
                    "start": row.start,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("State").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Detail"),
            Cell::new("Reads"),
            Cell::new("Next"),
        ]);

    for row in &rows {
        let name = if row.start {
            Cell::new(format!("{} (start)", row.name)).fg(Color::Green)
        } else {
            Cell::new(&row.name)
        };
        let next = if row.next.is_empty() {
            Cell::new("end").fg(Color::DarkGrey)
        } else {
            Cell::new(row.next.join(", "))
        };
        table.add_row(vec![
            name,
            Cell::new(row.kind),
            Cell::new(&row.detail),
            Cell::new(row.reads.join(", ")),
            next,
        ]);
    }

    println!();
    if let Some(comment) = machine.comment() {
        println!("  {}", style(comment).dim());
        println!();
    }
    println!("{table}");
    println!();

    Ok(ExitCode::SUCCESS)
}
