//! The goal runner: the entry point of one engine tick.

use chrono::Utc;
use tracing::{info, instrument};

use crate::core::bindings::Bindings;
use crate::core::selector::{first_failed_action, next_open_objective};
use crate::core::state_update::settle_goal;
use crate::core::types::{Progress, RunReport};
use crate::exec::EngineContext;
use crate::exec::objective::run_objective;
use crate::tree::{Goal, GoalStatus};

/// Advance the goal by at most one action dispatch.
///
/// Bindings are collected from the outputs already recorded in the tree. When
/// the goal turns terminal the caller is expected to archive it.
#[instrument(skip_all, fields(goal_id = %goal.goal_id))]
pub fn run_goal(goal: &mut Goal, ctx: &EngineContext<'_>) -> RunReport {
    match goal.status {
        GoalStatus::Complete => return RunReport::new(Progress::Complete),
        GoalStatus::Failed => return RunReport::new(Progress::Failed(first_failed_action(goal))),
        GoalStatus::Pending | GoalStatus::InProgress => {}
    }

    let Some(index) = next_open_objective(goal) else {
        settle_goal(goal, Utc::now());
        info!("goal complete");
        return RunReport::new(Progress::Complete);
    };

    let bindings = Bindings::from_goal(goal);
    let report = run_objective(&mut goal.objectives[index], &bindings, ctx);
    settle_goal(goal, Utc::now());

    let progress = match (goal.status, report.progress) {
        (GoalStatus::Complete, _) => {
            info!("goal complete");
            Progress::Complete
        }
        (GoalStatus::Failed, Progress::Failed(stalled)) => Progress::Failed(stalled),
        (GoalStatus::Failed, _) => Progress::Failed(first_failed_action(goal)),
        (_, Progress::Stalled(stalled)) => Progress::Stalled(stalled),
        _ => Progress::InProgress,
    };
    if let Progress::Failed(stalled) = &progress {
        info!(blocked_by = ?stalled.as_ref().map(|s| &s.capability), "goal failed");
    }
    RunReport {
        progress,
        dispatched: report.dispatched,
    }
}
