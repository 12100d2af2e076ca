//! The tree store: one active goal on disk, cached in memory with an id index.
//!
//! Every write is a full, atomic replacement of `tree.json`. Loads check the
//! document in three passes (record structure, the embedded JSON Schema, then
//! semantic invariants) before the goal is cached. Action contracts are enforced
//! when a tree is admitted or a record is saved; at dispatch time the dispatcher
//! re-checks each action so a contract change only affects the actions it breaks.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::contract::{
    ContractLibrary, fill_tree_defaults, validate_tree, validate_tree_value,
};
use crate::core::invariants::{attempts_over_ceiling, validate_invariants};
use crate::error::{PersistenceFailure, RecordKind, SchemaViolation};
use crate::io::archive::archive_goal;
use crate::io::atomic::{sync_parent_dir, write_atomic};
use crate::io::init::EnginePaths;
use crate::tree::{Action, Goal, Objective, Task};

pub const TREE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/plan_tree/v1.schema.json"
));

/// Position of every objective and task in the cached goal.
#[derive(Debug, Default)]
struct TreeIndex {
    objectives: HashMap<String, usize>,
    tasks: HashMap<String, (usize, usize)>,
}

impl TreeIndex {
    fn build(goal: &Goal) -> Self {
        let mut index = Self::default();
        for (objective_index, objective) in goal.objectives.iter().enumerate() {
            index
                .objectives
                .insert(objective.objective_id.clone(), objective_index);
            for (task_index, task) in objective.tasks.iter().enumerate() {
                index
                    .tasks
                    .insert(task.task_id.clone(), (objective_index, task_index));
            }
        }
        index
    }
}

pub struct TreeStore {
    tree_path: PathBuf,
    archive_dir: PathBuf,
    contracts: Arc<ContractLibrary>,
    /// Only reported on load; the dispatcher enforces it.
    attempt_ceiling: u32,
    goal: Option<Goal>,
    index: TreeIndex,
}

impl TreeStore {
    pub fn new(
        tree_path: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
        contracts: Arc<ContractLibrary>,
        attempt_ceiling: u32,
    ) -> Self {
        Self {
            tree_path: tree_path.into(),
            archive_dir: archive_dir.into(),
            contracts,
            attempt_ceiling,
            goal: None,
            index: TreeIndex::default(),
        }
    }

    pub fn open(paths: &EnginePaths, contracts: Arc<ContractLibrary>, attempt_ceiling: u32) -> Self {
        Self::new(&paths.tree_path, &paths.archive_dir, contracts, attempt_ceiling)
    }

    pub fn tree_path(&self) -> &Path {
        &self.tree_path
    }

    pub fn contracts(&self) -> &ContractLibrary {
        &self.contracts
    }

    /// True if a goal is cached or an active snapshot exists on disk.
    pub fn has_active_goal(&self) -> bool {
        self.goal.is_some() || self.tree_path.exists()
    }

    /// Read and validate `tree.json`, replacing the cache.
    #[instrument(skip_all, fields(path = %self.tree_path.display()))]
    pub fn load(&mut self) -> Result<&Goal, PersistenceFailure> {
        self.goal = None;
        self.index = TreeIndex::default();

        let contents =
            fs::read_to_string(&self.tree_path).map_err(|error| PersistenceFailure::Read {
                path: self.tree_path.clone(),
                error,
            })?;
        let value: Value =
            serde_json::from_str(&contents).map_err(|error| PersistenceFailure::Parse {
                path: self.tree_path.clone(),
                error,
            })?;
        validate_tree_value(&value).map_err(|violation| PersistenceFailure::Contract {
            path: self.tree_path.clone(),
            violation,
        })?;
        validate_schema(&self.tree_path, &value)?;
        let mut goal: Goal =
            serde_json::from_value(value).map_err(|error| PersistenceFailure::Parse {
                path: self.tree_path.clone(),
                error,
            })?;

        let filled = fill_tree_defaults(&mut goal, &self.contracts);
        if filled > 0 {
            debug!(filled, "filled contract defaults on load");
        }
        let errors = validate_invariants(&goal);
        if !errors.is_empty() {
            return Err(PersistenceFailure::Invariants(errors));
        }
        for over in attempts_over_ceiling(&goal, self.attempt_ceiling) {
            warn!(%over, "action will fail without a new attempt");
        }

        debug!(goal_id = %goal.goal_id, "tree loaded");
        self.index = TreeIndex::build(&goal);
        Ok(self.goal.insert(goal))
    }

    /// Load on first use; afterwards return the cached goal.
    pub fn ensure_loaded(&mut self) -> Result<&mut Goal, PersistenceFailure> {
        if self.goal.is_none() {
            self.load()?;
        }
        self.goal.as_mut().ok_or(PersistenceFailure::NoActiveGoal)
    }

    /// Discard the in-memory state and reload from disk.
    pub fn refresh_cache(&mut self) -> Result<&Goal, PersistenceFailure> {
        self.load()
    }

    /// Overwrite `tree.json` with `goal` and cache it.
    #[instrument(skip_all, fields(path = %self.tree_path.display(), goal_id = %goal.goal_id))]
    pub fn write(&mut self, goal: Goal) -> Result<(), PersistenceFailure> {
        self.write_file(&goal)?;
        self.index = TreeIndex::build(&goal);
        self.goal = Some(goal);
        Ok(())
    }

    /// Persist the cached goal after it was mutated through [`TreeStore::goal_mut`].
    pub fn persist(&mut self) -> Result<(), PersistenceFailure> {
        let goal = self.goal.as_ref().ok_or(PersistenceFailure::NoActiveGoal)?;
        self.write_file(goal)?;
        self.index = TreeIndex::build(goal);
        Ok(())
    }

    fn write_file(&self, goal: &Goal) -> Result<(), PersistenceFailure> {
        let errors = validate_invariants(goal);
        if !errors.is_empty() {
            return Err(PersistenceFailure::Invariants(errors));
        }
        let mut buf = serde_json::to_vec_pretty(goal).map_err(PersistenceFailure::Serialize)?;
        buf.push(b'\n');
        write_atomic(&self.tree_path, &buf).map_err(|error| PersistenceFailure::Write {
            path: self.tree_path.clone(),
            error,
        })?;
        debug!(bytes = buf.len(), "tree written");
        Ok(())
    }

    /// Admit a freshly planned goal: defaults are filled and every record is validated.
    #[instrument(skip_all, fields(goal_id = %goal.goal_id))]
    pub fn insert(&mut self, mut goal: Goal) -> Result<(), PersistenceFailure> {
        if self.has_active_goal() {
            let active = match &self.goal {
                Some(active) => active.goal_id.clone(),
                None => self.tree_path.display().to_string(),
            };
            return Err(PersistenceFailure::GoalAlreadyActive(active));
        }
        fill_tree_defaults(&mut goal, &self.contracts);
        self.check_contracts(&goal)?;
        info!(objectives = goal.objectives.len(), "goal inserted");
        self.write(goal)
    }

    pub fn goal(&self) -> Option<&Goal> {
        self.goal.as_ref()
    }

    /// Mutable access for runners. Structure (ids and child lists) must not change;
    /// call [`TreeStore::persist`] afterwards.
    pub fn goal_mut(&mut self) -> Option<&mut Goal> {
        self.goal.as_mut()
    }

    pub fn get_goal(&self, goal_id: &str) -> Result<&Goal, PersistenceFailure> {
        self.goal
            .as_ref()
            .filter(|goal| goal.goal_id == goal_id)
            .ok_or_else(|| not_found(RecordKind::Goal, goal_id))
    }

    pub fn get_objective(&self, objective_id: &str) -> Result<&Objective, PersistenceFailure> {
        let goal = self.goal.as_ref().ok_or(PersistenceFailure::NoActiveGoal)?;
        self.index
            .objectives
            .get(objective_id)
            .and_then(|&index| goal.objectives.get(index))
            .ok_or_else(|| not_found(RecordKind::Objective, objective_id))
    }

    pub fn get_task(&self, task_id: &str) -> Result<&Task, PersistenceFailure> {
        let goal = self.goal.as_ref().ok_or(PersistenceFailure::NoActiveGoal)?;
        self.index
            .tasks
            .get(task_id)
            .and_then(|&(objective, task)| goal.objectives.get(objective)?.tasks.get(task))
            .ok_or_else(|| not_found(RecordKind::Task, task_id))
    }

    pub fn get_action(&self, task_id: &str, index: usize) -> Result<&Action, PersistenceFailure> {
        self.get_task(task_id)?
            .actions
            .get(index)
            .ok_or_else(|| not_found(RecordKind::Action, &format!("{}#{}", task_id, index)))
    }

    /// Replace the active goal with a validated record of the same id.
    pub fn save_goal(&mut self, goal_id: &str, goal: Goal) -> Result<(), PersistenceFailure> {
        self.get_goal(goal_id)?;
        if goal.goal_id != goal_id {
            return Err(self.immutable_id(RecordKind::Goal, "goal_id", goal_id, &goal.goal_id));
        }
        self.check_contracts(&goal)?;
        self.write(goal)
    }

    pub fn save_objective(
        &mut self,
        objective_id: &str,
        objective: Objective,
    ) -> Result<(), PersistenceFailure> {
        let position = *self
            .index
            .objectives
            .get(objective_id)
            .ok_or_else(|| not_found(RecordKind::Objective, objective_id))?;
        if objective.objective_id != objective_id {
            return Err(self.immutable_id(
                RecordKind::Objective,
                "objective_id",
                objective_id,
                &objective.objective_id,
            ));
        }
        let mut candidate = self.goal.clone().ok_or(PersistenceFailure::NoActiveGoal)?;
        candidate.objectives[position] = objective;
        self.check_contracts(&candidate)?;
        self.write(candidate)
    }

    pub fn save_task(&mut self, task_id: &str, task: Task) -> Result<(), PersistenceFailure> {
        let (objective, position) = *self
            .index
            .tasks
            .get(task_id)
            .ok_or_else(|| not_found(RecordKind::Task, task_id))?;
        if task.task_id != task_id {
            return Err(self.immutable_id(RecordKind::Task, "task_id", task_id, &task.task_id));
        }
        let mut candidate = self.goal.clone().ok_or(PersistenceFailure::NoActiveGoal)?;
        candidate.objectives[objective].tasks[position] = task;
        self.check_contracts(&candidate)?;
        self.write(candidate)
    }

    /// Move the terminal active goal into the archive and remove `tree.json`.
    #[instrument(skip_all, fields(path = %self.tree_path.display()))]
    pub fn archive(&mut self, now: DateTime<Utc>) -> Result<PathBuf, PersistenceFailure> {
        self.ensure_loaded()?;
        let goal = self.goal.as_ref().ok_or(PersistenceFailure::NoActiveGoal)?;
        if !goal.status.is_terminal() {
            return Err(PersistenceFailure::NotTerminal(goal.goal_id.clone()));
        }
        let archived = archive_goal(&self.archive_dir, goal, now)?;

        match fs::remove_file(&self.tree_path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(PersistenceFailure::Write {
                    path: self.tree_path.clone(),
                    error,
                });
            }
        }
        if let Some(parent) = self.tree_path.parent() {
            sync_parent_dir(parent).map_err(|error| PersistenceFailure::Write {
                path: parent.to_path_buf(),
                error,
            })?;
        }
        self.goal = None;
        self.index = TreeIndex::default();
        Ok(archived)
    }

    fn check_contracts(&self, goal: &Goal) -> Result<(), PersistenceFailure> {
        validate_tree(goal, &self.contracts).map_err(|violation| PersistenceFailure::Contract {
            path: self.tree_path.clone(),
            violation,
        })
    }

    fn immutable_id(&self, kind: RecordKind, field: &str, expected: &str, found: &str) -> PersistenceFailure {
        PersistenceFailure::Contract {
            path: self.tree_path.clone(),
            violation: SchemaViolation::new(
                kind,
                field,
                format!("is immutable (expected '{}', found '{}')", expected, found),
            ),
        }
    }
}

fn not_found(kind: RecordKind, id: &str) -> PersistenceFailure {
    PersistenceFailure::NotFound {
        kind,
        id: id.to_string(),
    }
}

fn validate_schema(path: &Path, tree: &Value) -> Result<(), PersistenceFailure> {
    let schema_value: Value =
        serde_json::from_str(TREE_SCHEMA).map_err(|err| PersistenceFailure::Schema {
            path: path.to_path_buf(),
            messages: format!("embedded schema is not JSON: {}", err),
        })?;
    let compiled = validator_for(&schema_value).map_err(|err| PersistenceFailure::Schema {
        path: path.to_path_buf(),
        messages: format!("invalid schema: {}", err),
    })?;
    if !compiled.is_valid(tree) {
        let messages = compiled
            .iter_errors(tree)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(PersistenceFailure::Schema {
            path: path.to_path_buf(),
            messages: messages.join("; "),
        });
    }
    Ok(())
}
