//! Deterministic selection logic for the plan tree.
//!
//! Children are always considered in declaration order.

use crate::core::types::StalledAction;
use crate::tree::{Action, ActionState, Goal, GoalStatus, Objective, Task, TaskStatus};

/// Index of the first action that has not reached `complete` or `skipped`.
///
/// A later action is never eligible while an earlier one is open, so a `failed`
/// action blocks everything declared after it.
pub fn next_open_action(task: &Task) -> Option<usize> {
    task.actions.iter().position(|action| !action.state.is_done())
}

/// Index of the action to dispatch next, if the first open action is pending.
pub fn next_pending_action(task: &Task) -> Option<usize> {
    let index = next_open_action(task)?;
    (task.actions[index].state == ActionState::Pending).then_some(index)
}

/// Index of the first task that is not complete.
pub fn next_open_task(objective: &Objective) -> Option<usize> {
    objective
        .tasks
        .iter()
        .position(|task| task.status != TaskStatus::Complete)
}

/// Index of the first objective that is not complete.
pub fn next_open_objective(goal: &Goal) -> Option<usize> {
    goal.objectives
        .iter()
        .position(|objective| objective.status != GoalStatus::Complete)
}

/// First open action of a task when it cannot be dispatched (failed, or active left over).
pub fn blocking_action(task: &Task) -> Option<usize> {
    let index = next_open_action(task)?;
    (task.actions[index].state != ActionState::Pending).then_some(index)
}

/// Returns true if an action can no longer progress on its own.
pub fn is_stuck(action: &Action, max_attempts: u32) -> bool {
    action.state == ActionState::Failed
        || (!action.state.is_done() && action.attempts >= max_attempts)
}

pub fn stalled_action(task: &Task, index: usize) -> Option<StalledAction> {
    let action = task.actions.get(index)?;
    Some(StalledAction {
        task_id: task.task_id.clone(),
        action_index: index,
        capability: action.capability(),
        attempts: action.attempts,
        last_error: action.last_error.clone(),
    })
}

/// Locate the action the next tick would run, following the active path.
///
/// Returns `(objective, task, action)` indices, or `None` when the active path has
/// nothing runnable.
pub fn next_action(goal: &Goal) -> Option<(usize, usize, usize)> {
    let objective_index = next_open_objective(goal)?;
    let objective = &goal.objectives[objective_index];
    let task_index = next_open_task(objective)?;
    let action_index = next_pending_action(&objective.tasks[task_index])?;
    Some((objective_index, task_index, action_index))
}

/// Find the action blocking the active path, if the path is blocked.
pub fn find_blocked(goal: &Goal) -> Option<StalledAction> {
    let objective = &goal.objectives[next_open_objective(goal)?];
    let task = &objective.tasks[next_open_task(objective)?];
    stalled_action(task, blocking_action(task)?)
}

/// First action anywhere in the tree left in `failed`.
pub fn first_failed_action(goal: &Goal) -> Option<StalledAction> {
    goal.objectives
        .iter()
        .flat_map(|objective| objective.tasks.iter())
        .find_map(|task| {
            let index = task
                .actions
                .iter()
                .position(|action| action.state == ActionState::Failed)?;
            stalled_action(task, index)
        })
}
