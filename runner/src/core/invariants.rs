//! Semantic invariants not expressible via JSON Schema.

use std::collections::HashSet;

use crate::core::path::action_path;
use crate::tree::{ActionState, Goal, GoalStatus, TaskStatus};

/// Check semantic invariants of a tree at rest:
/// - No duplicate objective or task ids
/// - No action left `active`
/// - A `complete` node has only done children
/// - A `failed` objective or goal contains a failed action
pub fn validate_invariants(goal: &Goal) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen_objectives = HashSet::new();
    let mut seen_tasks = HashSet::new();
    let mut goal_has_failed_action = false;

    for objective in &goal.objectives {
        let objective_path = format!("{}/{}", goal.goal_id, objective.objective_id);
        if !seen_objectives.insert(objective.objective_id.as_str()) {
            errors.push(format!(
                "duplicate objective id '{}' at {}",
                objective.objective_id, objective_path
            ));
        }
        let mut objective_has_failed_action = false;

        for task in &objective.tasks {
            let task_path = format!("{}/{}", objective_path, task.task_id);
            if !seen_tasks.insert(task.task_id.as_str()) {
                errors.push(format!("duplicate task id '{}' at {}", task.task_id, task_path));
            }

            for (index, action) in task.actions.iter().enumerate() {
                let path = action_path(&task_path, index);
                if action.state == ActionState::Active {
                    errors.push(format!("{}: action is 'active' at rest", path));
                }
                if action.state == ActionState::Failed {
                    objective_has_failed_action = true;
                }
            }

            if task.status == TaskStatus::Complete
                && !task.actions.iter().all(|action| action.state.is_done())
            {
                errors.push(format!(
                    "{}: task is complete but has unfinished actions",
                    task_path
                ));
            }
        }

        if objective.status == GoalStatus::Complete
            && !objective
                .tasks
                .iter()
                .all(|task| task.status == TaskStatus::Complete)
        {
            errors.push(format!(
                "{}: objective is complete but has incomplete tasks",
                objective_path
            ));
        }
        if objective.status == GoalStatus::Failed && !objective_has_failed_action {
            errors.push(format!(
                "{}: objective is failed without a failed action",
                objective_path
            ));
        }
        goal_has_failed_action |= objective_has_failed_action;
    }

    if goal.status == GoalStatus::Complete
        && !goal
            .objectives
            .iter()
            .all(|objective| objective.status == GoalStatus::Complete)
    {
        errors.push(format!(
            "{}: goal is complete but has incomplete objectives",
            goal.goal_id
        ));
    }
    if goal.status == GoalStatus::Failed && !goal_has_failed_action {
        errors.push(format!(
            "{}: goal is failed without a failed action",
            goal.goal_id
        ));
    }

    errors
}

/// Paths of actions whose recorded attempts exceed `attempt_ceiling`.
///
/// Not a defect of the tree: the ceiling is configuration and may be lowered
/// after attempts were made. The dispatcher fails such actions without a new attempt.
pub fn attempts_over_ceiling(goal: &Goal, attempt_ceiling: u32) -> Vec<String> {
    let mut over = Vec::new();
    for objective in &goal.objectives {
        for task in &objective.tasks {
            for (index, action) in task.actions.iter().enumerate() {
                if action.attempts > attempt_ceiling {
                    let task_path =
                        format!("{}/{}/{}", goal.goal_id, objective.objective_id, task.task_id);
                    over.push(format!(
                        "{}: attempts {} exceeds ceiling {}",
                        action_path(&task_path, index),
                        action.attempts,
                        attempt_ceiling
                    ));
                }
            }
        }
    }
    over
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{action, goal_with_actions};
    use serde_json::json;

    #[test]
    fn validate_invariants_reports_errors() {
        let mut active = action("mouse", "click", json!({"x": 1, "y": 2}));
        active.state = ActionState::Active;
        let mut over = action("mouse", "click", json!({"x": 1, "y": 2}));
        over.attempts = 5;
        let mut goal = goal_with_actions(vec![active, over]);
        let duplicate = goal.objectives[0].tasks[0].clone();
        goal.objectives[0].tasks.push(duplicate);
        goal.status = GoalStatus::Complete;

        let errors = validate_invariants(&goal);
        assert!(errors.iter().any(|err| err.contains("duplicate task id 't1'")));
        assert!(errors.iter().any(|err| err.contains("'active' at rest")));
        assert!(!errors.iter().any(|err| err.contains("exceeds ceiling")));
        assert!(errors.iter().any(|err| err.contains("goal is complete")));
    }

    #[test]
    fn attempts_over_a_lowered_ceiling_are_listed() {
        let mut over = action("mouse", "click", json!({"x": 1, "y": 2}));
        over.attempts = 3;
        let goal = goal_with_actions(vec![action("mouse", "click", json!({"x": 0, "y": 0})), over]);

        assert!(attempts_over_ceiling(&goal, 3).is_empty());
        assert_eq!(
            attempts_over_ceiling(&goal, 2),
            vec!["g1/o1/t1/#1: attempts 3 exceeds ceiling 2".to_string()]
        );
    }

    #[test]
    fn freshly_planned_tree_is_clean() {
        let goal = goal_with_actions(vec![action("mouse", "click", json!({"x": 1, "y": 2}))]);
        assert!(validate_invariants(&goal).is_empty());
    }

    #[test]
    fn failed_goal_requires_failed_action() {
        let mut goal = goal_with_actions(vec![]);
        goal.status = GoalStatus::Failed;
        let errors = validate_invariants(&goal);
        assert_eq!(errors, vec!["g1: goal is failed without a failed action".to_string()]);
    }
}
