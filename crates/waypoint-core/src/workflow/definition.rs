//! Workflow definition parsing, validation, and compilation.
//!
//! Turns the `WorkflowDefinition` wire format into a `StateMachine`: every
//! path is parsed, every choice rule and parameter template compiled, and
//! every state reference checked before an execution starts. A
//! `StateMachine` is immutable and can be shared by concurrent executions.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use waypoint_types::execution::StateKind;
use waypoint_types::workflow::{
    ChoiceDefinition, PassDefinition, StateDefinition, TaskDefinition, WorkflowDefinition,
};

use super::condition::Predicate;
use super::parameters::ParameterValue;
use super::path::{JsonPath, PathError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Load-time errors. A definition that fails here is never executed.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// JSON/YAML decode failure, including an unknown state `Type`.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("definition must have at least one state")]
    NoStates,

    #[error("StartAt '{0}' is not a defined state")]
    UnknownStartState(String),

    #[error("state '{state}': {field} targets unknown state '{target}'")]
    UnknownTarget {
        state: String,
        field: String,
        target: String,
    },

    #[error("state '{state}': {reason}")]
    InvalidState { state: String, reason: String },

    #[error("state '{state}': invalid {field}: {source}")]
    InvalidPath {
        state: String,
        field: String,
        #[source]
        source: PathError,
    },

    #[error("state '{state}': invalid choice rule {index}: {reason}")]
    InvalidChoiceRule {
        state: String,
        index: usize,
        reason: String,
    },

    #[error("state '{0}' is unreachable from StartAt")]
    Unreachable(String),

    #[error("TimeoutSeconds must be > 0")]
    ZeroTimeout,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a JSON definition. Structural validation happens in
/// `StateMachine::compile`.
pub fn parse_workflow_json(json: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Parse a YAML definition.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, DefinitionError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))
}

/// Load a definition file. `.yaml`/`.yml` files are read as YAML, anything
/// else as JSON.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => parse_workflow_yaml(&content),
        _ => parse_workflow_json(&content),
    }
}

/// Load and compile a definition file.
pub fn load_state_machine(path: &Path) -> Result<StateMachine, DefinitionError> {
    StateMachine::compile(&load_workflow_file(path)?)
}

// ---------------------------------------------------------------------------
// Compiled states
// ---------------------------------------------------------------------------

/// What happens after a Task or Pass state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(String),
    End,
}

impl Transition {
    pub fn target(&self) -> Option<&str> {
        match self {
            Transition::Next(name) => Some(name),
            Transition::End => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskState {
    pub resource: String,
    pub parameters: Option<ParameterValue>,
    pub input_path: Option<JsonPath>,
    /// `None` discards the task result.
    pub result_path: Option<JsonPath>,
    pub timeout: Option<Duration>,
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct PassState {
    /// `None` passes the context through.
    pub result: Option<Value>,
    pub result_path: Option<JsonPath>,
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct ChoiceBranch {
    pub rule: Predicate,
    pub next: String,
}

#[derive(Debug, Clone)]
pub struct ChoiceState {
    pub choices: Vec<ChoiceBranch>,
    pub default: String,
}

impl ChoiceState {
    /// Pick the target for `document`: the first matching rule in
    /// declaration order, else the default. Returns the matched rule index
    /// alongside the target.
    pub fn resolve(&self, document: &Value) -> (Option<usize>, &str) {
        self.choices
            .iter()
            .position(|branch| branch.rule.evaluate(document))
            .map_or((None, self.default.as_str()), |index| {
                (Some(index), self.choices[index].next.as_str())
            })
    }
}

/// A compiled state.
#[derive(Debug, Clone)]
pub enum State {
    Task(TaskState),
    Choice(ChoiceState),
    Pass(PassState),
}

impl State {
    pub fn kind(&self) -> StateKind {
        match self {
            State::Task(_) => StateKind::Task,
            State::Choice(_) => StateKind::Choice,
            State::Pass(_) => StateKind::Pass,
        }
    }

    /// Every state this one can transition to.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            State::Task(task) => task.transition.target().into_iter().collect(),
            State::Pass(pass) => pass.transition.target().into_iter().collect(),
            State::Choice(choice) => choice
                .choices
                .iter()
                .map(|branch| branch.next.as_str())
                .chain(std::iter::once(choice.default.as_str()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// StateMachine
// ---------------------------------------------------------------------------

/// A validated, compiled workflow.
#[derive(Debug, Clone)]
pub struct StateMachine {
    comment: Option<String>,
    start_at: String,
    states: BTreeMap<String, State>,
    timeout: Option<Duration>,
}

impl StateMachine {
    /// Validate and compile a definition.
    ///
    /// Checks, in order:
    /// - at least one state, `StartAt` defined, top-level `TimeoutSeconds` > 0
    /// - per state: `Next`/`End` exclusivity, paths, parameter templates,
    ///   choice rules, positive `TimeoutSeconds`
    /// - every `Next`/`Default` target exists
    /// - every state is reachable from `StartAt`
    pub fn compile(def: &WorkflowDefinition) -> Result<Self, DefinitionError> {
        if def.states.is_empty() {
            return Err(DefinitionError::NoStates);
        }
        if !def.states.contains_key(&def.start_at) {
            return Err(DefinitionError::UnknownStartState(def.start_at.clone()));
        }
        if def.timeout_seconds == Some(0) {
            return Err(DefinitionError::ZeroTimeout);
        }

        let mut states = BTreeMap::new();
        for (name, state) in &def.states {
            let compiled = match state {
                StateDefinition::Task(task) => State::Task(compile_task(name, task)?),
                StateDefinition::Choice(choice) => State::Choice(compile_choice(name, choice)?),
                StateDefinition::Pass(pass) => State::Pass(compile_pass(name, pass)?),
            };
            states.insert(name.clone(), compiled);
        }

        for (name, state) in &states {
            check_targets(name, state, &states)?;
        }

        let machine = Self {
            comment: def.comment.clone(),
            start_at: def.start_at.clone(),
            states,
            timeout: def.timeout_seconds.map(Duration::from_secs),
        };
        machine.check_reachable()?;
        Ok(machine)
    }

    pub fn start_at(&self) -> &str {
        &self.start_at
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Whole-execution deadline from the definition.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    /// States in name order.
    pub fn states(&self) -> impl Iterator<Item = (&str, &State)> {
        self.states.iter().map(|(name, state)| (name.as_str(), state))
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop a state after validation, to exercise the runtime lookup guard.
    #[cfg(test)]
    pub(crate) fn remove_state(&mut self, name: &str) {
        self.states.remove(name);
    }

    fn check_reachable(&self) -> Result<(), DefinitionError> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([self.start_at.as_str()]);
        while let Some(name) = queue.pop_front() {
            if !seen.insert(name) {
                continue;
            }
            if let Some(state) = self.states.get(name) {
                queue.extend(state.successors());
            }
        }
        match self.states.keys().find(|name| !seen.contains(name.as_str())) {
            Some(name) => Err(DefinitionError::Unreachable(name.clone())),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-state compilation
// ---------------------------------------------------------------------------

fn invalid(state: &str, reason: impl Into<String>) -> DefinitionError {
    DefinitionError::InvalidState {
        state: state.to_string(),
        reason: reason.into(),
    }
}

fn parse_path(state: &str, field: &str, raw: &str) -> Result<JsonPath, DefinitionError> {
    JsonPath::parse(raw).map_err(|source| DefinitionError::InvalidPath {
        state: state.to_string(),
        field: field.to_string(),
        source,
    })
}

/// Absent means `$`; explicit `null` discards.
fn compile_result_path(
    state: &str,
    result_path: &Option<Option<String>>,
) -> Result<Option<JsonPath>, DefinitionError> {
    match result_path {
        None => Ok(Some(JsonPath::root())),
        Some(None) => Ok(None),
        Some(Some(raw)) => parse_path(state, "ResultPath", raw).map(Some),
    }
}

fn compile_transition(
    state: &str,
    next: &Option<String>,
    end: Option<bool>,
) -> Result<Transition, DefinitionError> {
    match (next, end) {
        (Some(_), Some(true)) => Err(invalid(state, "cannot have both 'Next' and 'End: true'")),
        (Some(next), _) => Ok(Transition::Next(next.clone())),
        (None, Some(true)) => Ok(Transition::End),
        (None, Some(false)) => Err(invalid(state, "'End: false' requires 'Next'")),
        (None, None) => Err(invalid(state, "must have either 'Next' or 'End: true'")),
    }
}

fn compile_timeout(state: &str, seconds: Option<u64>) -> Result<Option<Duration>, DefinitionError> {
    match seconds {
        Some(0) => Err(invalid(state, "TimeoutSeconds must be > 0")),
        other => Ok(other.map(Duration::from_secs)),
    }
}

fn compile_task(name: &str, task: &TaskDefinition) -> Result<TaskState, DefinitionError> {
    if task.resource.trim().is_empty() {
        return Err(invalid(name, "'Resource' must not be empty"));
    }
    if task.retry.is_some() {
        return Err(invalid(
            name,
            "'Retry' is not supported; configure retries on the invoker route",
        ));
    }
    if task.catch.is_some() {
        return Err(invalid(name, "'Catch' is not supported"));
    }
    let parameters = task
        .parameters
        .as_ref()
        .map(|template| {
            ParameterValue::compile(template)
                .map_err(|reason| invalid(name, format!("invalid Parameters: {reason}")))
        })
        .transpose()?;
    let input_path = task
        .input_path
        .as_deref()
        .map(|raw| parse_path(name, "InputPath", raw))
        .transpose()?;

    Ok(TaskState {
        resource: task.resource.clone(),
        parameters,
        input_path,
        result_path: compile_result_path(name, &task.result_path)?,
        timeout: compile_timeout(name, task.timeout_seconds)?,
        transition: compile_transition(name, &task.next, task.end)?,
    })
}

fn compile_pass(name: &str, pass: &PassDefinition) -> Result<PassState, DefinitionError> {
    Ok(PassState {
        result: pass.result.clone(),
        result_path: compile_result_path(name, &pass.result_path)?,
        transition: compile_transition(name, &pass.next, pass.end)?,
    })
}

fn compile_choice(name: &str, choice: &ChoiceDefinition) -> Result<ChoiceState, DefinitionError> {
    if choice.choices.is_empty() {
        return Err(invalid(name, "'Choices' must contain at least one rule"));
    }
    let default = choice
        .default
        .clone()
        .ok_or_else(|| invalid(name, "Choice state requires a 'Default'"))?;

    let choices = choice
        .choices
        .iter()
        .enumerate()
        .map(|(index, rule)| {
            let rule_error = |reason: String| DefinitionError::InvalidChoiceRule {
                state: name.to_string(),
                index,
                reason,
            };
            let next = rule
                .next
                .clone()
                .ok_or_else(|| rule_error("top-level rule requires 'Next'".to_string()))?;
            let rule = Predicate::compile(rule, false).map_err(rule_error)?;
            Ok(ChoiceBranch { rule, next })
        })
        .collect::<Result<Vec<_>, DefinitionError>>()?;

    Ok(ChoiceState { choices, default })
}

fn check_targets(
    name: &str,
    state: &State,
    states: &BTreeMap<String, State>,
) -> Result<(), DefinitionError> {
    let check = |field: &str, target: &str| {
        if states.contains_key(target) {
            Ok(())
        } else {
            Err(DefinitionError::UnknownTarget {
                state: name.to_string(),
                field: field.to_string(),
                target: target.to_string(),
            })
        }
    };

    match state {
        State::Task(task) => task.transition.target().map_or(Ok(()), |t| check("Next", t)),
        State::Pass(pass) => pass.transition.target().map_or(Ok(()), |t| check("Next", t)),
        State::Choice(choice) => {
            for (index, branch) in choice.choices.iter().enumerate() {
                check(&format!("Choices[{index}].Next"), &branch.next)?;
            }
            check("Default", &choice.default)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
