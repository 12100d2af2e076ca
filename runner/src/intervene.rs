//! Operator interventions: admit a plan, skip or re-arm a blocked action, reset the tree.
//!
//! Each intervention re-derives statuses and persists the whole tree.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::core::contract::validate_tree_value;
use crate::core::state_update::{rearm_action, reset_goal, skip_action};
use crate::core::types::FailurePolicy;
use crate::io::tree_store::TreeStore;
use crate::tree::Goal;

/// Read a planned goal from a JSON file and admit it as the active tree.
pub fn insert_plan(store: &mut TreeStore, plan_path: &Path) -> Result<String> {
    let contents = fs::read_to_string(plan_path)
        .with_context(|| format!("read plan {}", plan_path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse plan {}", plan_path.display()))?;
    validate_tree_value(&value).with_context(|| format!("invalid plan {}", plan_path.display()))?;
    let goal: Goal = serde_json::from_value(value)
        .with_context(|| format!("deserialize plan {}", plan_path.display()))?;
    let goal_id = goal.goal_id.clone();
    store.insert(goal).context("insert plan")?;
    info!(goal_id = %goal_id, "plan inserted");
    Ok(goal_id)
}

/// Mark the action at `task_id#index` skipped.
pub fn skip(store: &mut TreeStore, task_id: &str, index: usize, policy: FailurePolicy) -> Result<()> {
    let goal = store.ensure_loaded().context("load active goal")?;
    skip_action(goal, task_id, index, policy, Utc::now()).map_err(|err| anyhow!(err))?;
    store.persist().context("persist tree after skip")?;
    info!(task_id, index, "action skipped");
    Ok(())
}

/// Return the failed action at `task_id#index` to `pending` with a fresh attempt budget.
pub fn rearm(store: &mut TreeStore, task_id: &str, index: usize, policy: FailurePolicy) -> Result<()> {
    let goal = store.ensure_loaded().context("load active goal")?;
    rearm_action(goal, task_id, index, policy, Utc::now()).map_err(|err| anyhow!(err))?;
    store.persist().context("persist tree after re-arm")?;
    info!(task_id, index, "action re-armed");
    Ok(())
}

/// Return every node of the active goal to its planned state.
pub fn reset(store: &mut TreeStore) -> Result<()> {
    let goal = store.ensure_loaded().context("load active goal")?;
    reset_goal(goal);
    store.persist().context("persist tree after reset")?;
    info!("tree reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::run_step;
    use crate::test_support::{Scripted, TestEngine, TestWorkspace, action, goal_with_actions};
    use crate::tree::{ActionState, ActionStatus, GoalStatus};
    use serde_json::json;

    fn stalled_workspace() -> (TestWorkspace, TestEngine) {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace
            .insert(goal_with_actions(vec![
                action("mouse", "click", json!({"x": 1, "y": 1})),
                action("mouse", "click", json!({"x": 2, "y": 2})),
            ]))
            .expect("insert");
        let mut engine = TestEngine::new(vec![Scripted::Fail("occluded".to_string())]);
        engine.retry.max_attempts = 1;
        let mut store = workspace.open_store(3).expect("store");
        let step = run_step(&mut store, &engine.ctx()).expect("step");
        assert!(step.stalled.is_some());
        (workspace, engine)
    }

    #[test]
    fn insert_plan_reads_a_goal_file() {
        let workspace = TestWorkspace::new().expect("workspace");
        let plan = workspace.root().join("plan.json");
        let goal = goal_with_actions(vec![action("keyboard", "type_text", json!({"text": "hi"}))]);
        fs::write(&plan, serde_json::to_string(&goal).expect("serialize")).expect("write plan");

        let mut store = workspace.open_store(3).expect("store");
        assert_eq!(insert_plan(&mut store, &plan).expect("insert"), "g1");
        let stored = workspace.read_tree().expect("tree");
        assert_eq!(
            stored.objectives[0].tasks[0].actions[0].input_args.get("delay_ms"),
            Some(&json!(20))
        );
    }

    #[test]
    fn insert_plan_reports_structural_defects_with_path() {
        let workspace = TestWorkspace::new().expect("workspace");
        let plan = workspace.root().join("plan.json");
        let mut value = serde_json::to_value(goal_with_actions(vec![action(
            "mouse",
            "click",
            json!({"x": 1, "y": 1}),
        )]))
        .expect("value");
        value["objectives"][0]["tasks"][0]["actions"][0]["state"] = json!("running");
        fs::write(&plan, value.to_string()).expect("write plan");

        let mut store = workspace.open_store(3).expect("store");
        let err = insert_plan(&mut store, &plan).expect_err("invalid state");
        assert!(format!("{:#}", err).contains("g1/o1/t1/#0"));
    }

    #[test]
    fn skip_persists_and_unblocks_next_step() {
        let (workspace, engine) = stalled_workspace();
        let mut store = workspace.open_store(3).expect("store");
        skip(&mut store, "t1", 0, FailurePolicy::Stall).expect("skip");

        let tree = workspace.read_tree().expect("tree");
        assert_eq!(tree.objectives[0].tasks[0].actions[0].state, ActionState::Skipped);

        let step = run_step(&mut store, &engine.ctx()).expect("step");
        assert_eq!(step.goal_status, GoalStatus::Complete);
    }

    #[test]
    fn rearm_allows_the_action_to_run_again() {
        let (workspace, engine) = stalled_workspace();
        let mut store = workspace.open_store(3).expect("store");
        rearm(&mut store, "t1", 0, FailurePolicy::Stall).expect("rearm");

        let tree = workspace.read_tree().expect("tree");
        let action = &tree.objectives[0].tasks[0].actions[0];
        assert_eq!(action.state, ActionState::Pending);
        assert_eq!(action.attempts, 0);

        let step = run_step(&mut store, &engine.ctx()).expect("step");
        assert!(step.stalled.is_none());
        assert_eq!(engine.executor.call_count(), 2);
    }

    #[test]
    fn rearm_rejects_actions_that_are_not_failed() {
        let (workspace, _engine) = stalled_workspace();
        let mut store = workspace.open_store(3).expect("store");
        let err = rearm(&mut store, "t1", 1, FailurePolicy::Stall).expect_err("pending");
        assert!(err.to_string().contains("only failed actions"));
    }

    #[test]
    fn skip_works_after_the_attempt_ceiling_is_lowered() {
        let workspace = TestWorkspace::new().expect("workspace");
        workspace
            .insert(goal_with_actions(vec![
                action("mouse", "click", json!({"x": 1, "y": 1})),
                action("mouse", "click", json!({"x": 2, "y": 2})),
            ]))
            .expect("insert");
        let engine = TestEngine::new(vec![
            Scripted::Fail("occluded".to_string()),
            Scripted::Fail("occluded".to_string()),
            Scripted::Fail("occluded".to_string()),
        ]);
        let mut store = workspace.open_store(3).expect("store");
        let step = run_step(&mut store, &engine.ctx()).expect("step");
        assert_eq!(step.stalled.expect("stalled").attempts, 3);

        let mut lowered = TestEngine::new(Vec::new());
        lowered.retry.max_attempts = 2;
        let mut store = workspace.open_store(2).expect("store");
        skip(&mut store, "t1", 0, FailurePolicy::Stall).expect("skip");

        let step = run_step(&mut store, &lowered.ctx()).expect("step");
        assert_eq!(step.goal_status, GoalStatus::Complete);
        assert_eq!(lowered.executor.call_count(), 1);
    }

    #[test]
    fn rearm_after_lowering_the_ceiling_restores_a_full_budget() {
        let workspace = TestWorkspace::new().expect("workspace");
        let mut failed = action("mouse", "click", json!({"x": 1, "y": 1}));
        failed.state = ActionState::Failed;
        failed.status = ActionStatus::Failed;
        failed.attempts = 3;
        failed.last_error = Some("occluded".to_string());
        workspace.insert(goal_with_actions(vec![failed])).expect("insert");

        let mut store = workspace.open_store(1).expect("store");
        rearm(&mut store, "t1", 0, FailurePolicy::Stall).expect("rearm");
        let tree = workspace.read_tree().expect("tree");
        assert_eq!(tree.objectives[0].tasks[0].actions[0].attempts, 0);
    }

    #[test]
    fn reset_returns_tree_to_planned_state() {
        let (workspace, _engine) = stalled_workspace();
        let mut store = workspace.open_store(3).expect("store");
        reset(&mut store).expect("reset");

        let tree = workspace.read_tree().expect("tree");
        assert_eq!(tree.status, GoalStatus::Pending);
        assert!(tree.actions().all(|action| action.state == ActionState::Pending
            && action.attempts == 0
            && action.last_error.is_none()));
    }
}
