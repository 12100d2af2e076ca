//! Engine configuration stored under `.exectree/state/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::FailurePolicy;
use crate::io::atomic::write_atomic;

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempt ceiling per action.
    pub max_attempts: u32,

    /// Wait between failed attempts of the same action.
    pub retry_delay_ms: u64,

    /// Pause before the first attempt of every action.
    pub action_delay_ms: u64,

    pub failure_policy: FailurePolicy,

    /// Directory of `<source>.json` contract files, relative to the project root.
    pub contracts_dir: PathBuf,

    /// Truncate executor stdout/stderr beyond this many bytes.
    pub executor_output_limit_bytes: usize,

    pub executors: Vec<ExecutorConfig>,
}

/// One command-backed executor registered under `source.name`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub source: String,
    pub name: String,
    /// Program and arguments, e.g. `["python3", "tools/click.py"]`.
    pub command: Vec<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 1000,
            action_delay_ms: 0,
            failure_policy: FailurePolicy::Stall,
            contracts_dir: PathBuf::from(".exectree/contracts"),
            executor_output_limit_bytes: 100_000,
            executors: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be > 0"));
        }
        if self.executor_output_limit_bytes == 0 {
            return Err(anyhow!("executor_output_limit_bytes must be > 0"));
        }
        if self.contracts_dir.as_os_str().is_empty() {
            return Err(anyhow!("contracts_dir must not be empty"));
        }
        for executor in &self.executors {
            let key = format!("{}.{}", executor.source, executor.name);
            if executor.source.trim().is_empty() || executor.name.trim().is_empty() {
                return Err(anyhow!("executor '{}' needs a source and a name", key));
            }
            if executor.command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(anyhow!("executor '{}': command must be a non-empty array", key));
            }
            if executor.timeout_secs == 0 {
                return Err(anyhow!("executor '{}': timeout_secs must be > 0", key));
            }
        }
        Ok(())
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk.
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, buf.as_bytes()).with_context(|| format!("write config {}", path.display()))
}
