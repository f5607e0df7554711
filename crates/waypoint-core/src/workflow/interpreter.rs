//! State-machine interpreter.
//!
//! Execution flow:
//! 1. Copy the caller input into a fresh `ExecutionContext`.
//! 2. Starting at `StartAt`, repeatedly look up the current state, dispatch
//!    on its kind, merge any result into the context, and follow the
//!    transition until a state ends the execution.
//! 3. Every runtime failure aborts the execution and is reported together
//!    with the failing state and the context as it was at that point.
//!
//! One execution is strictly sequential. The interpreter itself holds no
//! per-execution state, so independent executions can run concurrently on
//! one `Interpreter`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use waypoint_types::config::EngineConfig;
use waypoint_types::event::ExecutionEvent;
use waypoint_types::execution::{ExecutionStatus, StateTransition};
use waypoint_types::workflow::WorkflowDefinition;

use crate::event::EventBus;

use super::context::{ExecutionContext, MergeError};
use super::definition::{DefinitionError, PassState, State, StateMachine, TaskState};
use super::invoker::{InvocationError, InvokerRegistry};
use super::path::PathError;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Bounds applied to every execution.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterOptions {
    /// Maximum number of states one execution may enter.
    pub max_steps: u32,
    /// Per-task deadline when the state sets no `TimeoutSeconds`.
    pub task_timeout: Duration,
    /// Maximum serialized size of the context.
    pub max_context_bytes: usize,
    /// Whole-execution deadline when the definition sets none.
    pub execution_timeout: Option<Duration>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for InterpreterOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            max_context_bytes: config.max_context_bytes,
            execution_timeout: config.execution_timeout_secs.map(Duration::from_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Runtime failures. Each one aborts the execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The current state name is not in the state machine.
    #[error("state '{0}' does not exist")]
    UnknownState(String),

    #[error("task '{state}' failed invoking '{resource}': {source}")]
    Invocation {
        state: String,
        resource: String,
        #[source]
        source: InvocationError,
    },

    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded { limit: u32 },

    #[error("task '{state}' timed out after {timeout_ms}ms")]
    TaskTimeout { state: String, timeout_ms: u64 },

    #[error("execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("execution cancelled")]
    Cancelled,

    /// A `.$` parameter or `InputPath` did not resolve.
    #[error("state '{state}': path '{path}' did not resolve against the context")]
    PathResolution { state: String, path: String },

    #[error("state '{state}': cannot merge result: {source}")]
    ResultMerge {
        state: String,
        #[source]
        source: PathError,
    },

    #[error("state '{state}': context of {size} bytes exceeds the limit of {max} bytes")]
    ContextTooLarge {
        state: String,
        size: usize,
        max: usize,
    },
}

impl ExecutionError {
    /// Stable error name for events, logs and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            ExecutionError::UnknownState(_) => "UnknownStateError",
            ExecutionError::Invocation { .. } => "InvocationError",
            ExecutionError::StepLimitExceeded { .. } => "StepLimitExceededError",
            ExecutionError::TaskTimeout { .. } => "TaskTimeoutError",
            ExecutionError::ExecutionTimeout { .. } => "ExecutionTimeoutError",
            ExecutionError::Cancelled => "CancelledError",
            ExecutionError::PathResolution { .. } => "PathResolutionError",
            ExecutionError::ResultMerge { .. } => "ResultMergeError",
            ExecutionError::ContextTooLarge { .. } => "ContextTooLargeError",
        }
    }

    fn from_merge(state: &str, err: MergeError) -> Self {
        match err {
            MergeError::Path(source) => ExecutionError::ResultMerge {
                state: state.to_string(),
                source,
            },
            MergeError::TooLarge { size, max } => ExecutionError::ContextTooLarge {
                state: state.to_string(),
                size,
                max,
            },
        }
    }
}

/// Everything known about a finished execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    /// Terminal state on success, failing state on failure.
    pub state: String,
    /// Final context, or the partial context at the point of failure.
    pub context: Value,
    pub error: Option<ExecutionError>,
    /// Number of states entered.
    pub steps: u32,
    pub history: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Successful outcome of `ExecutionResult::into_outcome`.
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    pub context: Value,
    pub terminal_state: String,
}

/// Failed outcome of `ExecutionResult::into_outcome`.
#[derive(Debug, Clone, Error)]
#[error("execution failed in state '{failed_state}': {error}")]
pub struct Failed {
    #[source]
    pub error: ExecutionError,
    pub failed_state: String,
    pub context: Value,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// Split into `{context, terminal_state}` or `{error, failed_state}`.
    pub fn into_outcome(self) -> Result<Completed, Failed> {
        match self.error {
            None => Ok(Completed {
                context: self.context,
                terminal_state: self.state,
            }),
            Some(error) => Err(Failed {
                error,
                failed_state: self.state,
                context: self.context,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

/// Mutable state of one in-flight execution.
struct Run {
    current: String,
    context: ExecutionContext,
    steps: u32,
    history: Vec<StateTransition>,
}

/// Executes compiled state machines against injected task invokers.
#[derive(Debug, Clone)]
pub struct Interpreter {
    invokers: Arc<InvokerRegistry>,
    options: InterpreterOptions,
    event_bus: Option<EventBus>,
}

impl Interpreter {
    pub fn new(invokers: InvokerRegistry) -> Self {
        Self::with_shared_invokers(Arc::new(invokers))
    }

    pub fn with_shared_invokers(invokers: Arc<InvokerRegistry>) -> Self {
        Self {
            invokers,
            options: InterpreterOptions::default(),
            event_bus: None,
        }
    }

    pub fn with_options(mut self, options: InterpreterOptions) -> Self {
        self.options = options;
        self
    }

    /// Publish `ExecutionEvent`s to `bus` while executing.
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn options(&self) -> &InterpreterOptions {
        &self.options
    }

    pub fn invokers(&self) -> &InvokerRegistry {
        &self.invokers
    }

    /// Compile `definition` and execute it. Definition errors are reported
    /// before any state runs.
    pub async fn run(
        &self,
        definition: &WorkflowDefinition,
        input: &Value,
    ) -> Result<ExecutionResult, DefinitionError> {
        let machine = StateMachine::compile(definition)?;
        Ok(self.execute(&machine, input).await)
    }

    /// Execute a compiled state machine. `input` is copied, never mutated.
    pub async fn execute(&self, machine: &StateMachine, input: &Value) -> ExecutionResult {
        self.execute_with_cancellation(machine, input, CancellationToken::new())
            .await
    }

    /// Execute, aborting with `Cancelled` once `cancel` fires. Cancellation
    /// is observed between states and while a task is in flight.
    pub async fn execute_with_cancellation(
        &self,
        machine: &StateMachine,
        input: &Value,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let execution_id = Uuid::now_v7();
        let started_at = Utc::now();
        let started = Instant::now();

        let mut run = Run {
            current: machine.start_at().to_string(),
            context: ExecutionContext::new(input, self.options.max_context_bytes),
            steps: 0,
            history: Vec::new(),
        };

        tracing::info!(
            execution_id = %execution_id,
            start_at = machine.start_at(),
            states = machine.len(),
            "starting execution"
        );
        self.publish(ExecutionEvent::ExecutionStarted {
            execution_id,
            start_at: run.current.clone(),
        });

        let deadline = machine.timeout().or(self.options.execution_timeout);
        let outcome = match deadline {
            Some(limit) => {
                match tokio::time::timeout(
                    limit,
                    self.drive(machine, &mut run, execution_id, &cancel),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ExecutionError::ExecutionTimeout {
                        timeout_ms: limit.as_millis() as u64,
                    }),
                }
            }
            None => self.drive(machine, &mut run, execution_id, &cancel).await,
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, error) = match outcome {
            Ok(()) => {
                tracing::info!(
                    execution_id = %execution_id,
                    terminal_state = run.current.as_str(),
                    steps = run.steps,
                    duration_ms,
                    "execution succeeded"
                );
                self.publish(ExecutionEvent::ExecutionSucceeded {
                    execution_id,
                    terminal_state: run.current.clone(),
                    steps: run.steps,
                    duration_ms,
                });
                (ExecutionStatus::Succeeded, None)
            }
            Err(error) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    state = run.current.as_str(),
                    code = error.code(),
                    error = %error,
                    "execution failed"
                );
                self.publish(ExecutionEvent::ExecutionFailed {
                    execution_id,
                    failed_state: run.current.clone(),
                    error_code: error.code().to_string(),
                    error: error.to_string(),
                });
                (ExecutionStatus::Failed, Some(error))
            }
        };

        ExecutionResult {
            execution_id,
            status,
            state: run.current,
            context: run.context.into_document(),
            error,
            steps: run.steps,
            history: run.history,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// The control loop. On return `run.current` names the terminal state
    /// (success) or the failing state (error).
    async fn drive(
        &self,
        machine: &StateMachine,
        run: &mut Run,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            if run.steps >= self.options.max_steps {
                return Err(ExecutionError::StepLimitExceeded {
                    limit: self.options.max_steps,
                });
            }
            let state = machine
                .state(&run.current)
                .ok_or_else(|| ExecutionError::UnknownState(run.current.clone()))?;

            run.steps += 1;
            let kind = state.kind();
            let entered_at = Utc::now();
            let started = Instant::now();

            tracing::debug!(
                execution_id = %execution_id,
                state = run.current.as_str(),
                kind = %kind,
                step = run.steps,
                "entering state"
            );
            self.publish(ExecutionEvent::StateEntered {
                execution_id,
                state: run.current.clone(),
                kind,
                step: run.steps,
            });

            let result = match state {
                State::Task(task) => {
                    self.run_task(&run.current, task, &mut run.context, execution_id, cancel)
                        .await
                }
                State::Pass(pass) => run_pass(&run.current, pass, &mut run.context),
                State::Choice(choice) => {
                    let (matched_rule, target) = choice.resolve(run.context.document());
                    tracing::debug!(
                        execution_id = %execution_id,
                        state = run.current.as_str(),
                        next = target,
                        matched_rule = ?matched_rule,
                        "choice resolved"
                    );
                    self.publish(ExecutionEvent::ChoiceResolved {
                        execution_id,
                        state: run.current.clone(),
                        target: target.to_string(),
                        matched_rule,
                    });
                    Ok(Some(target.to_string()))
                }
            };

            run.history.push(StateTransition {
                state: run.current.clone(),
                kind,
                entered_at,
                exited_at: Utc::now(),
                succeeded: result.is_ok(),
            });
            let next = result?;

            self.publish(ExecutionEvent::StateExited {
                execution_id,
                state: run.current.clone(),
                kind,
                duration_ms: started.elapsed().as_millis() as u64,
            });

            match next {
                Some(next) => run.current = next,
                None => return Ok(()),
            }
        }
    }

    async fn run_task(
        &self,
        name: &str,
        task: &TaskState,
        context: &mut ExecutionContext,
        execution_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, ExecutionError> {
        let input = match &task.parameters {
            Some(template) => template.resolve(context.document()).map_err(|unresolved| {
                ExecutionError::PathResolution {
                    state: name.to_string(),
                    path: unresolved.path,
                }
            })?,
            None => context
                .select(task.input_path.as_ref())
                .cloned()
                .ok_or_else(|| ExecutionError::PathResolution {
                    state: name.to_string(),
                    path: task
                        .input_path
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "$".to_string()),
                })?,
        };

        let timeout = task.timeout.unwrap_or(self.options.task_timeout);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.invokers.invoke(&task.resource, &input)) => outcome,
        };

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    state = name,
                    resource = task.resource.as_str(),
                    kind = source.kind(),
                    error = %source,
                    "task failed"
                );
                self.publish(ExecutionEvent::TaskFailed {
                    execution_id,
                    state: name.to_string(),
                    resource: task.resource.clone(),
                    error: source.to_string(),
                });
                return Err(ExecutionError::Invocation {
                    state: name.to_string(),
                    resource: task.resource.clone(),
                    source,
                });
            }
            Err(_elapsed) => {
                let error = ExecutionError::TaskTimeout {
                    state: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                };
                tracing::warn!(
                    execution_id = %execution_id,
                    state = name,
                    resource = task.resource.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "task timed out"
                );
                self.publish(ExecutionEvent::TaskFailed {
                    execution_id,
                    state: name.to_string(),
                    resource: task.resource.clone(),
                    error: error.to_string(),
                });
                return Err(error);
            }
        };

        context
            .merge(task.result_path.as_ref(), output)
            .map_err(|e| ExecutionError::from_merge(name, e))?;
        Ok(task.transition.target().map(str::to_string))
    }

    fn publish(&self, event: ExecutionEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

fn run_pass(
    name: &str,
    pass: &PassState,
    context: &mut ExecutionContext,
) -> Result<Option<String>, ExecutionError> {
    let result = match &pass.result {
        Some(result) => result.clone(),
        None => context.document().clone(),
    };
    context
        .merge(pass.result_path.as_ref(), result)
        .map_err(|e| ExecutionError::from_merge(name, e))?;
    Ok(pass.transition.target().map(str::to_string))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
