//! The action dispatcher and the task, objective and goal runners.
//!
//! Runners mutate the in-memory tree only. Each call performs at most one
//! action dispatch and then returns, so the caller can persist before the next
//! call.

pub mod action;
pub mod goal;
pub mod objective;
pub mod task;

use std::time::Duration;

use crate::core::contract::ContractLibrary;
use crate::core::types::FailurePolicy;
use crate::io::config::EngineConfig;
use crate::io::executor::ExecutorRegistry;
use crate::io::timer::RetryTimer;

/// Attempt ceiling and waits applied to every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Pause before the first attempt.
    pub action_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            retry_delay: cfg.retry_delay(),
            action_delay: cfg.action_delay(),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Everything a dispatch needs besides the tree itself.
pub struct EngineContext<'a> {
    pub registry: &'a ExecutorRegistry,
    pub contracts: &'a ContractLibrary,
    pub timer: &'a dyn RetryTimer,
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
}

impl<'a> EngineContext<'a> {
    pub fn new(
        registry: &'a ExecutorRegistry,
        contracts: &'a ContractLibrary,
        timer: &'a dyn RetryTimer,
        cfg: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            contracts,
            timer,
            retry: RetryPolicy::from_config(cfg),
            failure_policy: cfg.failure_policy,
        }
    }
}
