//! Execution tracking types shared by the interpreter and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall status of a finished execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// The kind of state, for history records and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Task,
    Choice,
    Pass,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKind::Task => write!(f, "Task"),
            StateKind::Choice => write!(f, "Choice"),
            StateKind::Pass => write!(f, "Pass"),
        }
    }
}

/// One entry in an execution's in-memory history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State name.
    pub state: String,
    pub kind: StateKind,
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
    /// False when the state aborted the execution.
    pub succeeded: bool,
}
