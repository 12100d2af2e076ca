//! Error taxonomy for the engine.
//!
//! Engine components return these typed errors; orchestration code wraps them
//! in `anyhow` with context the way the rest of the crate does.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which record kind a validation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Goal,
    Objective,
    Task,
    Action,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordKind::Goal => "goal",
            RecordKind::Objective => "objective",
            RecordKind::Task => "task",
            RecordKind::Action => "action",
        };
        f.write_str(label)
    }
}

/// Structural or contract defect in a record. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at {path}: field '{field}' {reason}")]
pub struct SchemaViolation {
    pub kind: RecordKind,
    pub field: String,
    pub reason: String,
    /// `/`-separated location of the failing node, deepest first found.
    pub path: String,
}

impl SchemaViolation {
    pub fn new(kind: RecordKind, field: &str, reason: impl Into<String>) -> Self {
        Self {
            kind,
            field: field.to_string(),
            reason: reason.into(),
            path: String::new(),
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }
}

/// No executor registered for a `(source, name)` pair. A configuration defect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no executor registered for '{capability_source}.{capability_name}'")]
pub struct UnresolvedCapability {
    pub capability_source: String,
    pub capability_name: String,
}

/// The executor ran and reported failure (or faulted) on every allowed attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("execution failed after {attempts} attempt(s): {message}")]
pub struct ExecutionFailure {
    pub message: String,
    pub attempts: u32,
}

/// Durable read/write failures. Fatal, never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceFailure {
    #[error("failed to read {path}: {error}")]
    Read {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to parse {path}: {error}")]
    Parse {
        path: PathBuf,
        #[source]
        error: serde_json::Error,
    },
    #[error("failed to write {path}: {error}")]
    Write {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("failed to serialize tree: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("{path} does not match the plan tree schema: {messages}")]
    Schema { path: PathBuf, messages: String },
    #[error("contract violation in {path}: {violation}")]
    Contract {
        path: PathBuf,
        #[source]
        violation: SchemaViolation,
    },
    #[error("tree invariants failed: {}", .0.join("; "))]
    Invariants(Vec<String>),
    #[error("no active goal loaded")]
    NoActiveGoal,
    #[error("a goal is already active ('{0}')")]
    GoalAlreadyActive(String),
    #[error("{kind} '{id}' not found in the active tree")]
    NotFound { kind: RecordKind, id: String },
    #[error("goal '{0}' is not terminal and cannot be archived")]
    NotTerminal(String),
}
