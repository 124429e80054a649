//! Task records and their lifecycle state machine.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A task's position in its lifecycle DAG.
///
/// `submitted` is the only initial state. `failed` and `canceled` are
/// reachable from any non-terminal state. `submitted` must pass through
/// `working` before it can reach `completed` or `input_required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, not yet started.
    Submitted,
    /// In progress.
    Working,
    /// Paused awaiting additional input.
    InputRequired,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished with an error. Terminal.
    Failed,
    /// Aborted by request. Terminal.
    Canceled,
}

impl TaskState {
    /// Whether this state is terminal (no further transitions permitted).
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Whether a transition from `self` to `next` is permitted by the
    /// lifecycle DAG in `spec.md` §3.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed | Self::Canceled => true,
            Self::Completed | Self::InputRequired => {
                matches!(self, Self::Working) || self == next
            }
            Self::Working => matches!(self, Self::Submitted | Self::InputRequired | Self::Working),
            Self::Submitted => self == Self::Submitted,
        }
    }
}

/// A status snapshot embedded in a [`Task`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskStatus {
    /// Current lifecycle state.
    pub state: TaskState,
    /// Seconds since the Unix epoch when this status was recorded.
    pub timestamp: u64,
    /// Optional human-readable status message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A unit of asynchronous work tracked across its lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    /// Application-facing task identifier.
    pub id: String,
    /// Optional grouping identifier linking related tasks/messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// Artifacts produced so far.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Value>,
    /// Prior status snapshots, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<TaskStatus>,
}

/// The lifecycle transition requested was not permitted from the task's
/// current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot transition task from {from:?} to {to:?}")]
pub struct InvalidTransition {
    /// The state the task was in before the attempted transition.
    pub from: TaskState,
    /// The state transition that was rejected.
    pub to: TaskState,
}

impl Task {
    /// Create a new task in the `submitted` state.
    #[must_use]
    pub fn new(id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id: id.into(),
            context_id: None,
            status: TaskStatus {
                state: TaskState::Submitted,
                timestamp,
                message: None,
            },
            artifacts: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Attempt to move this task to `next`, archiving the prior status into
    /// `history`. Rejects transitions the lifecycle DAG forbids.
    pub fn transition(
        &mut self,
        next: TaskState,
        timestamp: u64,
        message: Option<String>,
    ) -> Result<(), InvalidTransition> {
        if !self.status.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status.state,
                to: next,
            });
        }
        let previous = std::mem::replace(
            &mut self.status,
            TaskStatus {
                state: next,
                timestamp,
                message,
            },
        );
        self.history.push(previous);
        Ok(())
    }
}
