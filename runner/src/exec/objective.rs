//! The objective runner.

use chrono::Utc;
use tracing::{debug, instrument};

use crate::core::bindings::Bindings;
use crate::core::selector::next_open_task;
use crate::core::state_update::settle_objective;
use crate::core::types::{Progress, RunReport};
use crate::exec::EngineContext;
use crate::exec::task::run_task;
use crate::tree::{GoalStatus, Objective};

/// Delegate to the first task that is not complete, then re-derive the
/// objective's status from all of its tasks.
#[instrument(skip_all, fields(objective_id = %objective.objective_id))]
pub fn run_objective(
    objective: &mut Objective,
    bindings: &Bindings,
    ctx: &EngineContext<'_>,
) -> RunReport {
    if objective.status == GoalStatus::Complete {
        return RunReport::new(Progress::Complete);
    }

    let Some(index) = next_open_task(objective) else {
        settle_objective(objective, ctx.failure_policy, Utc::now());
        debug!("no open tasks; objective complete");
        return RunReport::new(Progress::Complete);
    };

    let report = run_task(&mut objective.tasks[index], bindings, ctx);
    settle_objective(objective, ctx.failure_policy, Utc::now());

    let progress = match (objective.status, report.progress) {
        (GoalStatus::Complete, _) => Progress::Complete,
        (GoalStatus::Failed, Progress::Stalled(stalled)) => Progress::Failed(Some(stalled)),
        (GoalStatus::Failed, Progress::Failed(stalled)) => Progress::Failed(stalled),
        (GoalStatus::Failed, _) => Progress::Failed(None),
        (_, Progress::Stalled(stalled)) => Progress::Stalled(stalled),
        _ => Progress::InProgress,
    };
    RunReport {
        progress,
        dispatched: report.dispatched,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailurePolicy;
    use crate::test_support::{Scripted, TestEngine, action, goal_with_tasks};
    use crate::tree::TaskStatus;
    use serde_json::json;

    #[test]
    fn tasks_run_in_order_and_complete_the_objective() {
        let engine = TestEngine::new(Vec::new());
        let mut goal = goal_with_tasks(vec![
            vec![action("mouse", "click", json!({"x": 1, "y": 1}))],
            vec![action("mouse", "click", json!({"x": 2, "y": 2}))],
        ]);
        let objective = &mut goal.objectives[0];

        let first = run_objective(objective, &Bindings::new(), &engine.ctx());
        assert_eq!(first.progress, Progress::InProgress);
        assert_eq!(objective.tasks[0].status, TaskStatus::Complete);
        assert_eq!(objective.tasks[1].status, TaskStatus::Pending);
        assert_eq!(objective.status, GoalStatus::InProgress);

        let second = run_objective(objective, &Bindings::new(), &engine.ctx());
        assert_eq!(second.progress, Progress::Complete);
        assert_eq!(objective.status, GoalStatus::Complete);
        assert!(objective.completed_at.is_some());
    }

    #[test]
    fn objective_with_no_tasks_completes_immediately() {
        let engine = TestEngine::new(Vec::new());
        let mut goal = goal_with_tasks(Vec::new());

        let report = run_objective(&mut goal.objectives[0], &Bindings::new(), &engine.ctx());
        assert_eq!(report, RunReport::new(Progress::Complete));
        assert_eq!(goal.objectives[0].status, GoalStatus::Complete);
    }

    #[test]
    fn escalate_policy_fails_the_objective() {
        let mut engine = TestEngine::new(vec![Scripted::Fail("gone".to_string())]);
        engine.retry.max_attempts = 1;
        engine.failure_policy = FailurePolicy::Escalate;
        let mut goal = goal_with_tasks(vec![
            vec![action("mouse", "click", json!({"x": 1, "y": 1}))],
            vec![action("mouse", "click", json!({"x": 2, "y": 2}))],
        ]);
        let objective = &mut goal.objectives[0];

        let report = run_objective(objective, &Bindings::new(), &engine.ctx());
        let Progress::Failed(Some(stalled)) = &report.progress else {
            panic!("expected failure, got {:?}", report.progress);
        };
        assert_eq!(stalled.task_id, "t1");
        assert_eq!(objective.status, GoalStatus::Failed);
        assert!(objective.completed_at.is_some());
        assert_eq!(objective.tasks[1].status, TaskStatus::Pending);
    }

    #[test]
    fn stall_policy_keeps_the_objective_in_progress() {
        let mut engine = TestEngine::new(vec![Scripted::Fail("gone".to_string())]);
        engine.retry.max_attempts = 1;
        let mut goal = goal_with_tasks(vec![vec![action("mouse", "click", json!({"x": 1, "y": 1}))]]);

        let report = run_objective(&mut goal.objectives[0], &Bindings::new(), &engine.ctx());
        assert!(matches!(report.progress, Progress::Stalled(_)));
        assert_eq!(goal.objectives[0].status, GoalStatus::InProgress);
    }
}
