//! The task runner.

use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::bindings::Bindings;
use crate::core::selector::{next_open_action, stalled_action};
use crate::core::state_update::settle_task;
use crate::core::types::{Dispatch, Progress, RunReport};
use crate::exec::EngineContext;
use crate::exec::action::run_action;
use crate::tree::{ActionState, Task, TaskStatus};

/// Advance a task by at most one action.
///
/// The first action that is neither `complete` nor `skipped` decides: if it is
/// pending it is dispatched, otherwise the task is stalled on it. Completion is
/// re-derived after the dispatch, so the call that finishes the last action
/// also completes the task. A task already `complete` is left untouched.
#[instrument(skip_all, fields(task_id = %task.task_id))]
pub fn run_task(task: &mut Task, bindings: &Bindings, ctx: &EngineContext<'_>) -> RunReport {
    if task.status == TaskStatus::Complete {
        return RunReport::new(Progress::Complete);
    }

    let Some(index) = next_open_action(task) else {
        settle_task(task, Utc::now());
        debug!("no open actions; task complete");
        return RunReport::new(Progress::Complete);
    };

    if task.actions[index].state != ActionState::Pending {
        settle_task(task, Utc::now());
        return match stalled_action(task, index) {
            Some(stalled) => RunReport::new(Progress::Stalled(stalled)),
            None => RunReport::new(Progress::InProgress),
        };
    }

    if task.status == TaskStatus::Pending {
        task.status = TaskStatus::InProgress;
    }
    let outcome = run_action(&mut task.actions[index], bindings, ctx);
    settle_task(task, Utc::now());
    debug!(action_index = index, outcome = outcome.label(), status = ?task.status, "action dispatched");

    let progress = if task.status == TaskStatus::Complete {
        Progress::Complete
    } else if task.actions[index].state == ActionState::Failed {
        stalled_action(task, index).map_or(Progress::InProgress, Progress::Stalled)
    } else {
        Progress::InProgress
    };
    RunReport {
        progress,
        dispatched: Some(Dispatch {
            task_id: task.task_id.clone(),
            action_index: index,
            outcome,
        }),
    }
}
