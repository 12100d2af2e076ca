//! Plan tree data model: Goal → Objective → Task → Action.
//!
//! Every parent owns its children through an ordered `Vec`. The `goal_id` and
//! `objective_id` fields on children are denormalized identifiers kept for
//! lookup and audit; traversal always goes parent → child.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle of goals and objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Failed,
}

impl GoalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, GoalStatus::Complete | GoalStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GoalStatus::Pending => "pending",
            GoalStatus::InProgress => "in_progress",
            GoalStatus::Complete => "complete",
            GoalStatus::Failed => "failed",
        }
    }
}

/// Lifecycle of a task. Tasks never fail; they stall behind a failed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
}

/// Position of an action in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionState {
    #[default]
    Pending,
    Active,
    Complete,
    Skipped,
    Failed,
}

impl ActionState {
    /// Terminal states that let the owning task complete.
    pub fn is_done(self) -> bool {
        matches!(self, ActionState::Complete | ActionState::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionState::Pending => "pending",
            ActionState::Active => "active",
            ActionState::Complete => "complete",
            ActionState::Skipped => "skipped",
            ActionState::Failed => "failed",
        }
    }
}

/// Outcome of the most recent attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[default]
    NotStarted,
    Success,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Goal {
    pub goal_id: String,
    pub description: String,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub objectives: Vec<Objective>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Objective {
    pub objective_id: String,
    pub goal_id: String,
    pub description: String,
    pub status: GoalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub task_id: String,
    pub objective_id: String,
    pub description: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub input_args: Map<String, Value>,
    pub state: ActionState,
    pub status: ActionStatus,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Output of the last successful attempt, published to later bindings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Binding key for `output`; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl Action {
    pub fn new(source: &str, name: &str, input_args: Map<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            source: source.to_string(),
            input_args,
            state: ActionState::Pending,
            status: ActionStatus::NotStarted,
            attempts: 0,
            last_error: None,
            output: None,
            store_as: None,
            completed_at: None,
        }
    }

    /// `source.name`, the capability key rendered for messages.
    pub fn capability(&self) -> String {
        format!("{}.{}", self.source, self.name)
    }

    pub fn binding_key(&self) -> &str {
        self.store_as.as_deref().unwrap_or(&self.name)
    }
}

impl Task {
    pub fn new(task_id: &str, objective_id: &str, description: &str, actions: Vec<Action>) -> Self {
        Self {
            task_id: task_id.to_string(),
            objective_id: objective_id.to_string(),
            description: description.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            actions,
        }
    }
}

impl Objective {
    pub fn new(objective_id: &str, goal_id: &str, description: &str, tasks: Vec<Task>) -> Self {
        Self {
            objective_id: objective_id.to_string(),
            goal_id: goal_id.to_string(),
            description: description.to_string(),
            status: GoalStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            tasks,
        }
    }
}

impl Goal {
    pub fn new(goal_id: &str, description: &str, objectives: Vec<Objective>) -> Self {
        Self {
            goal_id: goal_id.to_string(),
            description: description.to_string(),
            status: GoalStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            objectives,
        }
    }

    /// Iterate every action in declaration order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.objectives
            .iter()
            .flat_map(|objective| objective.tasks.iter())
            .flat_map(|task| task.actions.iter())
    }

    pub fn actions_mut(&mut self) -> impl Iterator<Item = &mut Action> {
        self.objectives
            .iter_mut()
            .flat_map(|objective| objective.tasks.iter_mut())
            .flat_map(|task| task.actions.iter_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_serializes_with_snake_case_enums_and_omits_empty_fields() {
        let action = Action::new("keyboard", "type_text", Map::new());
        let value = serde_json::to_value(&action).expect("serialize");
        assert_eq!(
            value,
            json!({
                "name": "type_text",
                "source": "keyboard",
                "input_args": {},
                "state": "pending",
                "status": "not_started",
            })
        );
    }

    #[test]
    fn action_without_attempts_deserializes_to_zero() {
        let action: Action = serde_json::from_value(json!({
            "name": "click",
            "source": "mouse",
            "input_args": {"x": 1},
            "state": "failed",
            "status": "failed",
            "last_error": "missed",
        }))
        .expect("deserialize");
        assert_eq!(action.attempts, 0);
        assert_eq!(action.state, ActionState::Failed);
        assert_eq!(action.binding_key(), "click");
    }
}
