//! Shared deterministic types for engine core logic.
//!
//! These types define stable contracts between the runners and their callers.
//! They carry no I/O handles.

use serde::{Deserialize, Serialize};

use crate::error::{ExecutionFailure, SchemaViolation, UnresolvedCapability};

/// What happens to ancestors when an action is left `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Ancestors stay non-complete until an operator resolves the action.
    #[default]
    Stall,
    /// The containing objective and goal become `failed`.
    Escalate,
}

/// Result of one `run_action` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// An attempt succeeded.
    Succeeded { attempts: u32 },
    /// Every allowed attempt failed; the action is left `failed`.
    Exhausted(ExecutionFailure),
    /// Contract validation or binding resolution rejected the action. No attempt was made.
    Rejected(SchemaViolation),
    /// No executor is registered for the action's capability. No attempt was made.
    Unresolved(UnresolvedCapability),
    /// A retry wait was cancelled; the action is back to `pending`.
    Interrupted { attempts: u32 },
}

impl ActionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, ActionOutcome::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionOutcome::Succeeded { .. } => "succeeded",
            ActionOutcome::Exhausted(_) => "exhausted",
            ActionOutcome::Rejected(_) => "rejected",
            ActionOutcome::Unresolved(_) => "unresolved",
            ActionOutcome::Interrupted { .. } => "interrupted",
        }
    }
}

/// An action that blocks progress until an operator intervenes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StalledAction {
    pub task_id: String,
    pub action_index: usize,
    /// `source.name`
    pub capability: String,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Where a node stands after a runner call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Complete,
    InProgress,
    /// No eligible child can run; a failed action needs resolution.
    Stalled(StalledAction),
    /// Escalation policy turned a failed action into a failed node.
    Failed(Option<StalledAction>),
}

/// The action dispatched during a runner call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub task_id: String,
    pub action_index: usize,
    pub outcome: ActionOutcome,
}

/// Report returned by the task, objective and goal runners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub progress: Progress,
    pub dispatched: Option<Dispatch>,
}

impl RunReport {
    pub fn new(progress: Progress) -> Self {
        Self {
            progress,
            dispatched: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.progress == Progress::Complete
    }

    pub fn stalled(&self) -> Option<&StalledAction> {
        match &self.progress {
            Progress::Stalled(stalled) | Progress::Failed(Some(stalled)) => Some(stalled),
            _ => None,
        }
    }
}
