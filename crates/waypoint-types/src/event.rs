//! Event types for the Waypoint execution event bus.
//!
//! `ExecutionEvent` is broadcast while the interpreter walks a state machine.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::execution::StateKind;

/// Events emitted during a single execution.
///
/// Informational only: the interpreter never waits on subscribers and events
/// are not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The execution context was created and the start state resolved.
    ExecutionStarted {
        execution_id: Uuid,
        start_at: String,
    },

    /// A state is about to run.
    StateEntered {
        execution_id: Uuid,
        state: String,
        kind: StateKind,
        /// 1-based step number within the execution.
        step: u32,
    },

    /// A Choice state selected its target.
    ChoiceResolved {
        execution_id: Uuid,
        state: String,
        target: String,
        /// Index of the matching rule, `None` when the default was taken.
        matched_rule: Option<usize>,
    },

    /// A state finished without aborting the execution.
    StateExited {
        execution_id: Uuid,
        state: String,
        kind: StateKind,
        duration_ms: u64,
    },

    /// A task invocation failed or timed out.
    TaskFailed {
        execution_id: Uuid,
        state: String,
        resource: String,
        error: String,
    },

    /// The execution reached a terminal state.
    ExecutionSucceeded {
        execution_id: Uuid,
        terminal_state: String,
        steps: u32,
        duration_ms: u64,
    },

    /// The execution aborted.
    ExecutionFailed {
        execution_id: Uuid,
        failed_state: String,
        error_code: String,
        error: String,
    },
}

impl ExecutionEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> Uuid {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::StateEntered { execution_id, .. }
            | ExecutionEvent::ChoiceResolved { execution_id, .. }
            | ExecutionEvent::StateExited { execution_id, .. }
            | ExecutionEvent::TaskFailed { execution_id, .. }
            | ExecutionEvent::ExecutionSucceeded { execution_id, .. }
            | ExecutionEvent::ExecutionFailed { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ExecutionEvent::ChoiceResolved {
            execution_id: Uuid::nil(),
            state: "CheckVolumes".to_string(),
            target: "SendNotification".to_string(),
            matched_rule: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "choice_resolved");
        assert_eq!(json["target"], "SendNotification");
        assert!(json["matched_rule"].is_null());
    }

    #[test]
    fn test_execution_id_accessor() {
        let id = Uuid::now_v7();
        let event = ExecutionEvent::StateEntered {
            execution_id: id,
            state: "A".to_string(),
            kind: StateKind::Pass,
            step: 1,
        };
        assert_eq!(event.execution_id(), id);
    }
}
