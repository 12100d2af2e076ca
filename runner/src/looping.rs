//! Multi-step driver for `exectree loop`.

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::core::types::{ActionOutcome, StalledAction};
use crate::exec::EngineContext;
use crate::io::tree_store::TreeStore;
use crate::step::{StepOutcome, run_step};
use crate::tree::GoalStatus;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The goal completed and was archived.
    Complete { archived: Option<PathBuf> },
    /// The goal failed under the escalation policy and was archived.
    Failed {
        stalled: Option<StalledAction>,
        archived: Option<PathBuf>,
    },
    /// A failed action blocks the active path; an operator must skip or re-arm it.
    Stalled(StalledAction),
    /// A retry wait was cancelled.
    Interrupted { task_id: String, action_index: usize },
    /// The configured step limit was reached.
    MaxSteps { limit: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub goal_id: Option<String>,
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Run steps until the goal completes or fails, the path stalls, a wait is
/// cancelled, or `max_steps` is reached.
///
/// Stops immediately on any persistence error.
pub fn run_loop<F: FnMut(&StepOutcome)>(
    store: &mut TreeStore,
    ctx: &EngineContext<'_>,
    max_steps: Option<u32>,
    mut on_step: F,
) -> Result<LoopOutcome> {
    let mut steps_executed = 0u32;
    let mut goal_id = None;
    loop {
        if let Some(limit) = max_steps
            && steps_executed >= limit
        {
            return Ok(LoopOutcome {
                goal_id,
                steps_executed,
                stop: LoopStop::MaxSteps { limit },
            });
        }

        let step = run_step(store, ctx)?;
        steps_executed += 1;
        on_step(&step);
        goal_id = Some(step.goal_id.clone());

        let stop = match step.goal_status {
            GoalStatus::Complete => Some(LoopStop::Complete {
                archived: step.archived,
            }),
            GoalStatus::Failed => Some(LoopStop::Failed {
                stalled: step.stalled,
                archived: step.archived,
            }),
            GoalStatus::Pending | GoalStatus::InProgress => match (step.stalled, step.dispatched) {
                (Some(stalled), _) => Some(LoopStop::Stalled(stalled)),
                (None, Some(dispatch))
                    if matches!(dispatch.outcome, ActionOutcome::Interrupted { .. }) =>
                {
                    Some(LoopStop::Interrupted {
                        task_id: dispatch.task_id,
                        action_index: dispatch.action_index,
                    })
                }
                _ if !step.advanced => {
                    bail!("step made no progress on goal '{}'", step.goal_id)
                }
                _ => None,
            },
        };
        if let Some(stop) = stop {
            return Ok(LoopOutcome {
                goal_id,
                steps_executed,
                stop,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FailurePolicy;
    use crate::test_support::{
        InstantTimer, Scripted, TestEngine, TestWorkspace, action, goal_with_actions,
    };
    use crate::tree::Goal;
    use serde_json::json;

    fn three_clicks() -> Goal {
        goal_with_actions(vec![
            action("mouse", "click", json!({"x": 1, "y": 1})),
            action("mouse", "click", json!({"x": 2, "y": 2})),
            action("mouse", "click", json!({"x": 3, "y": 3})),
        ])
    }

    #[test]
    fn loop_runs_to_completion_and_archives() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.insert(three_clicks()).expect("insert");
        let engine = TestEngine::new(Vec::new());
        let mut store = workspace.open_store(3).expect("store");
        let mut seen = Vec::new();

        let outcome = run_loop(&mut store, &engine.ctx(), None, |step| {
            seen.push(step.goal_status);
        })
        .expect("loop");

        assert_eq!(outcome.steps_executed, 3);
        assert!(matches!(outcome.stop, LoopStop::Complete { archived: Some(_) }));
        assert_eq!(
            seen,
            vec![GoalStatus::InProgress, GoalStatus::InProgress, GoalStatus::Complete]
        );
        assert_eq!(engine.executor.call_count(), 3);
    }

    #[test]
    fn loop_stops_on_stall_with_later_actions_untouched() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.insert(three_clicks()).expect("insert");
        let mut engine = TestEngine::new(vec![
            Scripted::Succeed(None),
            Scripted::Fail("occluded".to_string()),
            Scripted::Fail("occluded".to_string()),
        ]);
        engine.retry.max_attempts = 2;
        let mut store = workspace.open_store(2).expect("store");

        let outcome = run_loop(&mut store, &engine.ctx(), None, |_| {}).expect("loop");
        let LoopStop::Stalled(stalled) = outcome.stop else {
            panic!("expected stall, got {:?}", outcome.stop);
        };
        assert_eq!(stalled.action_index, 1);
        assert_eq!(stalled.attempts, 2);
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(engine.executor.call_count(), 3);
    }

    #[test]
    fn loop_respects_max_steps() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.insert(three_clicks()).expect("insert");
        let engine = TestEngine::new(Vec::new());
        let mut store = workspace.open_store(3).expect("store");

        let outcome = run_loop(&mut store, &engine.ctx(), Some(2), |_| {}).expect("loop");
        assert_eq!(outcome.stop, LoopStop::MaxSteps { limit: 2 });
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(outcome.goal_id.as_deref(), Some("g1"));
    }

    #[test]
    fn loop_stops_when_retry_wait_is_cancelled() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.insert(three_clicks()).expect("insert");
        let mut engine = TestEngine::new(vec![Scripted::Fail("busy".to_string())]);
        engine.timer = InstantTimer::cancelling_on(1);
        let mut store = workspace.open_store(3).expect("store");

        let outcome = run_loop(&mut store, &engine.ctx(), None, |_| {}).expect("loop");
        assert_eq!(
            outcome.stop,
            LoopStop::Interrupted {
                task_id: "t1".to_string(),
                action_index: 0
            }
        );
        let tree = workspace.read_tree().expect("tree");
        assert_eq!(tree.objectives[0].tasks[0].actions[0].attempts, 1);
    }

    #[test]
    fn escalated_failure_stops_the_loop_and_archives() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace.insert(three_clicks()).expect("insert");
        let mut engine = TestEngine::new(vec![Scripted::Fail("gone".to_string())]);
        engine.retry.max_attempts = 1;
        engine.failure_policy = FailurePolicy::Escalate;
        let mut store = workspace.open_store(3).expect("store");

        let outcome = run_loop(&mut store, &engine.ctx(), None, |_| {}).expect("loop");
        assert!(matches!(
            outcome.stop,
            LoopStop::Failed {
                stalled: Some(_),
                archived: Some(_)
            }
        ));
        assert!(!workspace.paths.tree_path.exists());
    }
}
