//! Validation helpers for the `.exectree/` layout, config, contracts and the active tree.

use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::core::contract::validate_tree;
use crate::workspace::Workspace;

/// High-level validation outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    /// Id of the active goal, if one is present.
    pub goal_id: Option<String>,
    pub actions: usize,
    pub contract_sources: usize,
    pub executors: usize,
}

/// Validate layout, config and contracts, then the active tree (if any) with
/// full contract checks and executor coverage.
pub fn validate_root(root: &Path) -> Result<ValidateOutcome> {
    let workspace = Workspace::open(root)?;
    let paths = &workspace.paths;
    ensure_dir(&paths.engine_dir)?;
    ensure_dir(&paths.state_dir)?;
    ensure_file(&paths.config_path)?;
    ensure_dir(&paths.contracts_dir(&workspace.config))?;

    let mut problems = Vec::new();
    for key in workspace.registry.keys() {
        if workspace.contracts.get(&key.source, &key.name).is_none() {
            problems.push(format!("executor '{}' has no action contract", key));
        }
    }

    let mut store = workspace.store();
    let mut outcome = ValidateOutcome {
        goal_id: None,
        actions: 0,
        contract_sources: workspace.contracts.sources().count(),
        executors: workspace.registry.len(),
    };
    if store.has_active_goal() {
        let goal = store.load().context("load tree.json")?;
        if let Err(violation) = validate_tree(goal, &workspace.contracts) {
            problems.push(violation.to_string());
        }
        for action in goal.actions() {
            if workspace.registry.resolve(&action.source, &action.name).is_none() {
                let missing = format!("no executor registered for '{}'", action.capability());
                if !problems.contains(&missing) {
                    problems.push(missing);
                }
            }
        }
        outcome.goal_id = Some(goal.goal_id.clone());
        outcome.actions = goal.actions().count();
    }

    if !problems.is_empty() {
        return Err(anyhow!("validation failed:\n- {}", problems.join("\n- ")));
    }
    Ok(outcome)
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing directory {}", path.display()));
    }
    if !path.is_dir() {
        return Err(anyhow!("expected directory {}", path.display()));
    }
    Ok(())
}

fn ensure_file(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(anyhow!("missing file {}", path.display()));
    }
    if !path.is_file() {
        return Err(anyhow!("expected file {}", path.display()));
    }
    Ok(())
}
