//! Helpers for rendering deterministic node paths.

use crate::tree::Goal;

/// Path segment for the action at `index` under `task_path`.
pub fn action_path(task_path: &str, index: usize) -> String {
    format!("{}/#{}", task_path, index)
}

/// Return the `/`-separated id path to the task `task_id`, rooted at the goal.
pub fn task_path(goal: &Goal, task_id: &str) -> Option<String> {
    for objective in &goal.objectives {
        for task in &objective.tasks {
            if task.task_id == task_id {
                return Some(format!(
                    "{}/{}/{}",
                    goal.goal_id, objective.objective_id, task.task_id
                ));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::goal_with_actions;

    #[test]
    fn task_path_includes_goal_and_objective() {
        let goal = goal_with_actions(Vec::new());
        assert_eq!(task_path(&goal, "t1"), Some("g1/o1/t1".to_string()));
        assert_eq!(task_path(&goal, "missing"), None);
    }

    #[test]
    fn action_path_uses_index_marker() {
        assert_eq!(action_path("g1/o1/t1", 2), "g1/o1/t1/#2");
    }
}
