//! Read-only status report for `exectree status`.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::core::path::{action_path, task_path};
use crate::core::selector::{find_blocked, first_failed_action, is_stuck, next_action};
use crate::core::state_update::settle_goal_tree;
use crate::core::types::{FailurePolicy, StalledAction};
use crate::tree::{Goal, GoalStatus};
use crate::workspace::Workspace;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// No active goal (nothing inserted, or the last goal was archived).
    NoGoal,
    /// The next step completes the goal without dispatching.
    Complete { goal_id: String },
    /// The goal failed under the escalation policy.
    Failed {
        goal_id: String,
        action: Option<SelectedAction>,
    },
    /// The next step dispatches this action.
    Open(SelectedAction),
    /// This action blocks the active path.
    Stuck(SelectedAction),
}

/// Minimal selected action metadata for reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedAction {
    pub path: String,
    pub capability: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
}

/// Report what the next step would do, without changing anything.
pub fn select_action(goal: &Goal, max_attempts: u32, policy: FailurePolicy) -> SelectOutcome {
    let mut preview = goal.clone();
    settle_goal_tree(&mut preview, policy, Utc::now());
    let goal_id = goal.goal_id.clone();

    match preview.status {
        GoalStatus::Complete => return SelectOutcome::Complete { goal_id },
        GoalStatus::Failed => {
            let action = first_failed_action(&preview)
                .map(|stalled| describe(&preview, &stalled, max_attempts));
            return SelectOutcome::Failed { goal_id, action };
        }
        GoalStatus::Pending | GoalStatus::InProgress => {}
    }

    if let Some((objective, task, index)) = next_action(&preview) {
        let task = &preview.objectives[objective].tasks[task];
        let action = &task.actions[index];
        let selected = SelectedAction {
            path: action_path(
                &format!("{}/{}/{}", goal_id, task.objective_id, task.task_id),
                index,
            ),
            capability: action.capability(),
            attempts: action.attempts,
            max_attempts,
            last_error: action.last_error.clone(),
        };
        if is_stuck(action, max_attempts) {
            return SelectOutcome::Stuck(selected);
        }
        return SelectOutcome::Open(selected);
    }

    match find_blocked(&preview) {
        Some(stalled) => SelectOutcome::Stuck(describe(&preview, &stalled, max_attempts)),
        None => SelectOutcome::Complete { goal_id },
    }
}

fn describe(goal: &Goal, stalled: &StalledAction, max_attempts: u32) -> SelectedAction {
    let path = task_path(goal, &stalled.task_id)
        .map(|path| action_path(&path, stalled.action_index))
        .unwrap_or_else(|| format!("{}#{}", stalled.task_id, stalled.action_index));
    SelectedAction {
        path,
        capability: stalled.capability.clone(),
        attempts: stalled.attempts,
        max_attempts,
        last_error: stalled.last_error.clone(),
    }
}

/// Load the active tree under `root` and report on it.
pub fn select_from_root(root: &Path) -> Result<SelectOutcome> {
    let workspace = Workspace::open(root)?;
    let mut store = workspace.store();
    if !store.has_active_goal() {
        return Ok(SelectOutcome::NoGoal);
    }
    let goal = store.load().context("load tree for status")?;
    Ok(select_action(
        goal,
        workspace.config.max_attempts,
        workspace.config.failure_policy,
    ))
}
