//! Engine-owned status derivation and operator interventions.
//!
//! A parent's `status` and `completed_at` are a pure function of its children.
//! The `settle_*` functions recompute them for one node; runners call them on
//! the active path after every dispatch, interventions call [`settle_goal_tree`].

use chrono::{DateTime, Utc};

use crate::core::types::FailurePolicy;
use crate::tree::{ActionState, ActionStatus, Goal, GoalStatus, Objective, Task, TaskStatus};

/// Recompute a task's status from its actions. Returns true if the status changed.
pub fn settle_task(task: &mut Task, now: DateTime<Utc>) -> bool {
    let next = if task.actions.iter().all(|action| action.state.is_done()) {
        TaskStatus::Complete
    } else if task
        .actions
        .iter()
        .any(|action| action.state != ActionState::Pending || action.attempts > 0)
    {
        TaskStatus::InProgress
    } else {
        TaskStatus::Pending
    };
    let changed = task.status != next;
    task.status = next;
    task.completed_at = stamp(next == TaskStatus::Complete, task.completed_at, now);
    changed
}

/// Recompute an objective's status from its tasks.
pub fn settle_objective(objective: &mut Objective, policy: FailurePolicy, now: DateTime<Utc>) -> bool {
    let next = if objective
        .tasks
        .iter()
        .all(|task| task.status == TaskStatus::Complete)
    {
        GoalStatus::Complete
    } else if policy == FailurePolicy::Escalate && objective.tasks.iter().any(has_failed_action) {
        GoalStatus::Failed
    } else if objective
        .tasks
        .iter()
        .any(|task| task.status != TaskStatus::Pending)
    {
        GoalStatus::InProgress
    } else {
        GoalStatus::Pending
    };
    let changed = objective.status != next;
    objective.status = next;
    objective.completed_at = stamp(next.is_terminal(), objective.completed_at, now);
    changed
}

/// Recompute a goal's status from its objectives.
pub fn settle_goal(goal: &mut Goal, now: DateTime<Utc>) -> bool {
    let next = if goal
        .objectives
        .iter()
        .all(|objective| objective.status == GoalStatus::Complete)
    {
        GoalStatus::Complete
    } else if goal
        .objectives
        .iter()
        .any(|objective| objective.status == GoalStatus::Failed)
    {
        GoalStatus::Failed
    } else if goal
        .objectives
        .iter()
        .any(|objective| objective.status != GoalStatus::Pending)
    {
        GoalStatus::InProgress
    } else {
        GoalStatus::Pending
    };
    let changed = goal.status != next;
    goal.status = next;
    goal.completed_at = stamp(next.is_terminal(), goal.completed_at, now);
    changed
}

/// Recompute every status in the tree bottom-up.
pub fn settle_goal_tree(goal: &mut Goal, policy: FailurePolicy, now: DateTime<Utc>) {
    for objective in &mut goal.objectives {
        for task in &mut objective.tasks {
            settle_task(task, now);
        }
        settle_objective(objective, policy, now);
    }
    settle_goal(goal, now);
}

fn has_failed_action(task: &Task) -> bool {
    task.actions
        .iter()
        .any(|action| action.state == ActionState::Failed)
}

fn stamp(
    terminal: bool,
    current: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match (terminal, current) {
        (true, Some(at)) => Some(at),
        (true, None) => Some(now),
        (false, _) => None,
    }
}

/// Mark a failed or pending action `skipped` so its task can move on.
pub fn skip_action(
    goal: &mut Goal,
    task_id: &str,
    index: usize,
    policy: FailurePolicy,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let action = find_action_mut(goal, task_id, index)?;
    match action.state {
        ActionState::Failed | ActionState::Pending => {
            action.state = ActionState::Skipped;
            action.completed_at = Some(now);
        }
        other => {
            return Err(format!(
                "cannot skip action {}#{} in state '{}'",
                task_id,
                index,
                other.as_str()
            ));
        }
    }
    settle_goal_tree(goal, policy, now);
    Ok(())
}

/// Return a failed action to `pending` with a fresh attempt budget.
pub fn rearm_action(
    goal: &mut Goal,
    task_id: &str,
    index: usize,
    policy: FailurePolicy,
    now: DateTime<Utc>,
) -> Result<(), String> {
    let action = find_action_mut(goal, task_id, index)?;
    if action.state != ActionState::Failed {
        return Err(format!(
            "cannot re-arm action {}#{} in state '{}' (only failed actions)",
            task_id,
            index,
            action.state.as_str()
        ));
    }
    action.state = ActionState::Pending;
    action.status = ActionStatus::NotStarted;
    action.attempts = 0;
    action.last_error = None;
    action.output = None;
    action.completed_at = None;
    settle_goal_tree(goal, policy, now);
    Ok(())
}

/// Return every node to its freshly planned state. `created_at` is kept.
pub fn reset_goal(goal: &mut Goal) {
    goal.status = GoalStatus::Pending;
    goal.completed_at = None;
    for objective in &mut goal.objectives {
        objective.status = GoalStatus::Pending;
        objective.completed_at = None;
        for task in &mut objective.tasks {
            task.status = TaskStatus::Pending;
            task.completed_at = None;
            for action in &mut task.actions {
                action.state = ActionState::Pending;
                action.status = ActionStatus::NotStarted;
                action.attempts = 0;
                action.last_error = None;
                action.output = None;
                action.completed_at = None;
            }
        }
    }
}

fn find_action_mut<'a>(
    goal: &'a mut Goal,
    task_id: &str,
    index: usize,
) -> Result<&'a mut crate::tree::Action, String> {
    let task = goal
        .objectives
        .iter_mut()
        .flat_map(|objective| objective.tasks.iter_mut())
        .find(|task| task.task_id == task_id)
        .ok_or_else(|| format!("task '{}' not found", task_id))?;
    let count = task.actions.len();
    task.actions
        .get_mut(index)
        .ok_or_else(|| format!("task '{}' has {} action(s), no index {}", task_id, count, index))
}
