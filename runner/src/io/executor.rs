//! Executor abstraction and the capability registry.
//!
//! The [`Executor`] trait decouples dispatch from whatever actually performs an
//! action. Executors are registered under the `(source, name)` capability key
//! and resolved by the dispatcher before the first attempt. Tests register
//! scripted executors that never spawn processes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::io::config::ExecutorConfig;
use crate::io::process::run_command_with_timeout;

/// What an executor reports for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn success(output: Option<Value>) -> Self {
        Self {
            success: true,
            output,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }
}

/// Performs one capability. `Err` is treated as a faulted attempt, the same as `success: false`.
pub trait Executor {
    fn invoke(&self, args: &Map<String, Value>) -> Result<Outcome>;
}

impl<F> Executor for F
where
    F: Fn(&Map<String, Value>) -> Result<Outcome>,
{
    fn invoke(&self, args: &Map<String, Value>) -> Result<Outcome> {
        self(args)
    }
}

/// Registry key: the action's `source` and `name`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CapabilityKey {
    pub source: String,
    pub name: String,
}

impl CapabilityKey {
    pub fn new(source: &str, name: &str) -> Self {
        Self {
            source: source.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for CapabilityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.name)
    }
}

/// Capability registry, populated before any dispatch.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: BTreeMap<CapabilityKey, Box<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor, replacing any previous one for the same key.
    pub fn register(&mut self, source: &str, name: &str, executor: impl Executor + 'static) {
        let key = CapabilityKey::new(source, name);
        if self.executors.insert(key.clone(), Box::new(executor)).is_some() {
            warn!(capability = %key, "executor replaced");
        }
    }

    pub fn resolve(&self, source: &str, name: &str) -> Option<&dyn Executor> {
        self.executors
            .get(&CapabilityKey::new(source, name))
            .map(|executor| executor.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &CapabilityKey> {
        self.executors.keys()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Build a registry of [`CommandExecutor`]s from configuration.
    pub fn from_config(
        executors: &[ExecutorConfig],
        workdir: &Path,
        output_limit_bytes: usize,
    ) -> Self {
        let mut registry = Self::new();
        for entry in executors {
            registry.register(
                &entry.source,
                &entry.name,
                CommandExecutor {
                    command: entry.command.clone(),
                    workdir: workdir.to_path_buf(),
                    timeout: Duration::from_secs(entry.timeout_secs),
                    output_limit_bytes,
                },
            );
        }
        debug!(executors = registry.len(), "executor registry built");
        registry
    }
}

/// Executor that runs an external command per attempt.
///
/// The resolved arguments are written to stdin as one JSON object. The command
/// reports its [`Outcome`] as JSON on the last non-empty stdout line; earlier
/// lines are ignored. A non-zero exit or a timeout is a failed attempt.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(program = self.command.first().map(String::as_str).unwrap_or(""), timeout_secs = self.timeout.as_secs()))]
    fn invoke(&self, args: &Map<String, Value>) -> Result<Outcome> {
        let (program, rest) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("executor command is empty"))?;
        let payload = serde_json::to_vec(args).context("serialize executor arguments")?;

        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&self.workdir);
        info!("invoking command executor");
        let output =
            run_command_with_timeout(cmd, Some(&payload), self.timeout, self.output_limit_bytes)
                .with_context(|| format!("run executor command '{}'", program))?;

        if output.timed_out {
            return Ok(Outcome::failure(format!(
                "executor timed out after {}s",
                self.timeout.as_secs()
            )));
        }
        if !output.status.success() {
            let stderr = output.stderr_summary();
            return Ok(Outcome::failure(if stderr.is_empty() {
                format!("executor exited with {}", output.status)
            } else {
                format!("executor exited with {}: {}", output.status, stderr)
            }));
        }
        parse_outcome(&output.stdout_text())
    }
}

/// Parse the [`Outcome`] from the last non-empty line of command stdout.
pub fn parse_outcome(stdout: &str) -> Result<Outcome> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("executor produced no outcome on stdout"))?;
    serde_json::from_str(line).with_context(|| format!("parse executor outcome '{}'", line))
}
