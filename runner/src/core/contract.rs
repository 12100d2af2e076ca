//! Contract validation for plan records.
//!
//! Two layers are checked here:
//! - structure: required fields, id shape, and enumerated `status`/`state` values;
//! - action contracts: `input_args` must carry exactly the argument names the
//!   action's source declares, counting declared defaults as filled.
//!
//! Validation never mutates. [`fill_defaults`] is the separate, explicit step
//! that writes contract defaults into omitted arguments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::path::action_path;
use crate::error::{RecordKind, SchemaViolation};
use crate::tree::{Action, ActionState, ActionStatus, Goal, Objective, Task, TaskStatus};

/// Declared arguments, either `["x", "y"]` or `{"x": {...}, "y": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgDeclaration {
    Names(Vec<String>),
    Described(Map<String, Value>),
}

impl Default for ArgDeclaration {
    fn default() -> Self {
        ArgDeclaration::Names(Vec::new())
    }
}

impl ArgDeclaration {
    pub fn names(&self) -> Vec<&str> {
        match self {
            ArgDeclaration::Names(names) => names.iter().map(String::as_str).collect(),
            ArgDeclaration::Described(map) => map.keys().map(String::as_str).collect(),
        }
    }
}

/// Contract for one action of one source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionContract {
    pub name: String,
    #[serde(default, alias = "required_args")]
    pub input_args: ArgDeclaration,
    #[serde(default)]
    pub defaults: Map<String, Value>,
}

impl ActionContract {
    /// True if `arg` is declared, either as required or through a default.
    pub fn declares(&self, arg: &str) -> bool {
        self.input_args.names().contains(&arg) || self.defaults.contains_key(arg)
    }
}

/// All declared action contracts, keyed by source then action name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContractLibrary {
    sources: BTreeMap<String, BTreeMap<String, ActionContract>>,
}

impl ContractLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source: &str, contract: ActionContract) {
        self.sources
            .entry(source.to_string())
            .or_default()
            .insert(contract.name.clone(), contract);
    }

    pub fn get(&self, source: &str, name: &str) -> Option<&ActionContract> {
        self.sources.get(source)?.get(name)
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.sources.contains_key(source)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Borrowed view over any plan record.
#[derive(Debug, Clone, Copy)]
pub enum Record<'a> {
    Goal(&'a Goal),
    Objective(&'a Objective),
    Task(&'a Task),
    Action(&'a Action),
}

impl Record<'_> {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Goal(_) => RecordKind::Goal,
            Record::Objective(_) => RecordKind::Objective,
            Record::Task(_) => RecordKind::Task,
            Record::Action(_) => RecordKind::Action,
        }
    }
}

/// Validate one typed record (its own fields only; children are not visited).
pub fn validate_record(record: Record<'_>, contracts: &ContractLibrary) -> Result<(), SchemaViolation> {
    match record {
        Record::Goal(goal) => {
            require_id(RecordKind::Goal, "goal_id", &goal.goal_id)?;
            require_completion_stamp(
                RecordKind::Goal,
                goal.status.is_terminal(),
                goal.completed_at.is_some(),
            )
        }
        Record::Objective(objective) => {
            require_id(
                RecordKind::Objective,
                "objective_id",
                &objective.objective_id,
            )?;
            require_id(RecordKind::Objective, "goal_id", &objective.goal_id)?;
            require_completion_stamp(
                RecordKind::Objective,
                objective.status.is_terminal(),
                objective.completed_at.is_some(),
            )
        }
        Record::Task(task) => {
            require_id(RecordKind::Task, "task_id", &task.task_id)?;
            require_id(RecordKind::Task, "objective_id", &task.objective_id)?;
            require_completion_stamp(
                RecordKind::Task,
                task.status == TaskStatus::Complete,
                task.completed_at.is_some(),
            )
        }
        Record::Action(action) => validate_action(action, contracts),
    }
}

/// Validate an action's structure and its `input_args` against its source contract.
pub fn validate_action(action: &Action, contracts: &ContractLibrary) -> Result<(), SchemaViolation> {
    require_id(RecordKind::Action, "source", &action.source)?;
    require_id(RecordKind::Action, "name", &action.name)?;

    let failed = action.status == ActionStatus::Failed;
    if failed != action.last_error.is_some() {
        return Err(SchemaViolation::new(
            RecordKind::Action,
            "last_error",
            "must be present if and only if status is 'failed'",
        ));
    }
    if action.state == ActionState::Complete && action.status != ActionStatus::Success {
        return Err(SchemaViolation::new(
            RecordKind::Action,
            "status",
            "must be 'success' when state is 'complete'",
        ));
    }

    if !contracts.has_source(&action.source) {
        return Err(SchemaViolation::new(
            RecordKind::Action,
            "source",
            format!("no contract declared for source '{}'", action.source),
        ));
    }
    let contract = contracts.get(&action.source, &action.name).ok_or_else(|| {
        SchemaViolation::new(
            RecordKind::Action,
            "name",
            format!(
                "action '{}' is not declared by source '{}'",
                action.name, action.source
            ),
        )
    })?;

    let mut missing: Vec<&str> = contract
        .input_args
        .names()
        .into_iter()
        .filter(|arg| !action.input_args.contains_key(*arg) && !contract.defaults.contains_key(*arg))
        .collect();
    missing.sort_unstable();
    if !missing.is_empty() {
        return Err(SchemaViolation::new(
            RecordKind::Action,
            "input_args",
            format!("missing required argument(s): {}", missing.join(", ")),
        ));
    }

    let mut unexpected: Vec<&str> = action
        .input_args
        .keys()
        .map(String::as_str)
        .filter(|arg| !contract.declares(arg))
        .collect();
    unexpected.sort_unstable();
    if !unexpected.is_empty() {
        return Err(SchemaViolation::new(
            RecordKind::Action,
            "input_args",
            format!("unexpected argument(s): {}", unexpected.join(", ")),
        ));
    }

    Ok(())
}

/// Recursively validate every node of `goal`, stopping at the first violation.
///
/// The returned violation carries the path of the failing node.
pub fn validate_tree(goal: &Goal, contracts: &ContractLibrary) -> Result<(), SchemaViolation> {
    let goal_path = goal.goal_id.clone();
    validate_record(Record::Goal(goal), contracts).map_err(|v| v.at(goal_path.clone()))?;

    for objective in &goal.objectives {
        let objective_path = format!("{}/{}", goal_path, objective.objective_id);
        validate_record(Record::Objective(objective), contracts)
            .map_err(|v| v.at(objective_path.clone()))?;
        if objective.goal_id != goal.goal_id {
            return Err(back_reference(
                RecordKind::Objective,
                "goal_id",
                &objective.goal_id,
                &goal.goal_id,
            )
            .at(objective_path));
        }

        for task in &objective.tasks {
            let task_path = format!("{}/{}", objective_path, task.task_id);
            validate_record(Record::Task(task), contracts).map_err(|v| v.at(task_path.clone()))?;
            if task.objective_id != objective.objective_id {
                return Err(back_reference(
                    RecordKind::Task,
                    "objective_id",
                    &task.objective_id,
                    &objective.objective_id,
                )
                .at(task_path));
            }

            for (index, action) in task.actions.iter().enumerate() {
                validate_record(Record::Action(action), contracts)
                    .map_err(|v| v.at(action_path(&task_path, index)))?;
            }
        }
    }

    Ok(())
}

/// Fill omitted arguments from the contract's defaults. Explicit arguments are never
/// overwritten. Returns the number of arguments filled.
pub fn fill_defaults(action: &mut Action, contracts: &ContractLibrary) -> usize {
    let Some(contract) = contracts.get(&action.source, &action.name) else {
        return 0;
    };
    let mut filled = 0;
    for (arg, value) in &contract.defaults {
        if !action.input_args.contains_key(arg) {
            action.input_args.insert(arg.clone(), value.clone());
            filled += 1;
        }
    }
    filled
}

/// Apply [`fill_defaults`] to every action of a tree.
pub fn fill_tree_defaults(goal: &mut Goal, contracts: &ContractLibrary) -> usize {
    goal.actions_mut()
        .map(|action| fill_defaults(action, contracts))
        .sum()
}

struct RecordShape {
    required: &'static [&'static str],
    ids: &'static [&'static str],
    enums: &'static [(&'static str, &'static [&'static str])],
    objects: &'static [&'static str],
    arrays: &'static [&'static str],
}

const GOAL_STATUSES: &[&str] = &["pending", "in_progress", "complete", "failed"];
const TASK_STATUSES: &[&str] = &["pending", "in_progress", "complete"];
const ACTION_STATES: &[&str] = &["pending", "active", "complete", "skipped", "failed"];
const ACTION_STATUSES: &[&str] = &["not_started", "success", "failed"];

fn shape(kind: RecordKind) -> RecordShape {
    match kind {
        RecordKind::Goal => RecordShape {
            required: &["goal_id", "description", "status", "created_at", "objectives"],
            ids: &["goal_id"],
            enums: &[("status", GOAL_STATUSES)],
            objects: &[],
            arrays: &["objectives"],
        },
        RecordKind::Objective => RecordShape {
            required: &[
                "objective_id",
                "goal_id",
                "description",
                "status",
                "created_at",
                "tasks",
            ],
            ids: &["objective_id", "goal_id"],
            enums: &[("status", GOAL_STATUSES)],
            objects: &[],
            arrays: &["tasks"],
        },
        RecordKind::Task => RecordShape {
            required: &[
                "task_id",
                "objective_id",
                "description",
                "status",
                "created_at",
                "actions",
            ],
            ids: &["task_id", "objective_id"],
            enums: &[("status", TASK_STATUSES)],
            objects: &[],
            arrays: &["actions"],
        },
        RecordKind::Action => RecordShape {
            required: &["name", "source", "input_args", "state", "status"],
            ids: &["name", "source"],
            enums: &[("state", ACTION_STATES), ("status", ACTION_STATUSES)],
            objects: &["input_args"],
            arrays: &[],
        },
    }
}

/// Validate the structure of a raw JSON record of the given kind (children not visited).
pub fn validate_value(value: &Value, kind: RecordKind) -> Result<(), SchemaViolation> {
    let Some(object) = value.as_object() else {
        return Err(SchemaViolation::new(kind, "<record>", "must be a JSON object"));
    };
    let shape = shape(kind);

    for field in shape.required {
        if !object.contains_key(*field) {
            return Err(SchemaViolation::new(kind, field, "is required"));
        }
    }
    for field in shape.ids {
        match object.get(*field).and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => {}
            _ => return Err(SchemaViolation::new(kind, field, "must be a non-empty string")),
        }
    }
    for (field, allowed) in shape.enums {
        let value = object.get(*field).and_then(Value::as_str).unwrap_or_default();
        if !allowed.contains(&value) {
            return Err(SchemaViolation::new(
                kind,
                field,
                format!("has invalid value '{}' (allowed: {})", value, allowed.join(", ")),
            ));
        }
    }
    for field in shape.objects {
        if !object.get(*field).is_some_and(Value::is_object) {
            return Err(SchemaViolation::new(kind, field, "must be an object"));
        }
    }
    for field in shape.arrays {
        if !object.get(*field).is_some_and(Value::is_array) {
            return Err(SchemaViolation::new(kind, field, "must be an array"));
        }
    }
    if let Some(attempts) = object.get("attempts")
        && !attempts.is_u64()
    {
        return Err(SchemaViolation::new(
            kind,
            "attempts",
            "must be a non-negative integer",
        ));
    }
    Ok(())
}

/// Recursively validate a raw JSON goal document, reporting the deepest failing path.
pub fn validate_tree_value(value: &Value) -> Result<(), SchemaViolation> {
    let goal_path = id_of(value, "goal_id");
    validate_value(value, RecordKind::Goal).map_err(|v| v.at(goal_path.clone()))?;

    for objective in children(value, "objectives") {
        let objective_path = format!("{}/{}", goal_path, id_of(objective, "objective_id"));
        validate_value(objective, RecordKind::Objective)
            .map_err(|v| v.at(objective_path.clone()))?;

        for task in children(objective, "tasks") {
            let task_path = format!("{}/{}", objective_path, id_of(task, "task_id"));
            validate_value(task, RecordKind::Task).map_err(|v| v.at(task_path.clone()))?;

            for (index, action) in children(task, "actions").iter().enumerate() {
                validate_value(action, RecordKind::Action)
                    .map_err(|v| v.at(action_path(&task_path, index)))?;
            }
        }
    }
    Ok(())
}

fn children<'a>(value: &'a Value, field: &str) -> &'a [Value] {
    value
        .get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn id_of(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or("?")
        .to_string()
}

fn require_id(kind: RecordKind, field: &str, value: &str) -> Result<(), SchemaViolation> {
    if value.trim().is_empty() {
        return Err(SchemaViolation::new(kind, field, "must be a non-empty string"));
    }
    Ok(())
}

fn require_completion_stamp(
    kind: RecordKind,
    terminal: bool,
    stamped: bool,
) -> Result<(), SchemaViolation> {
    if stamped && !terminal {
        return Err(SchemaViolation::new(
            kind,
            "completed_at",
            "is only allowed on a terminal status",
        ));
    }
    Ok(())
}

fn back_reference(kind: RecordKind, field: &str, found: &str, expected: &str) -> SchemaViolation {
    SchemaViolation::new(
        kind,
        field,
        format!("references '{}' but parent is '{}'", found, expected),
    )
}
