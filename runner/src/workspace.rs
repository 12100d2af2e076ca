//! Everything loaded from a project root before the engine can run.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::contract::ContractLibrary;
use crate::exec::EngineContext;
use crate::io::config::{EngineConfig, load_config};
use crate::io::contracts::load_contracts;
use crate::io::executor::ExecutorRegistry;
use crate::io::init::EnginePaths;
use crate::io::timer::RetryTimer;
use crate::io::tree_store::TreeStore;

/// Config, contracts and executors of one project root.
pub struct Workspace {
    pub paths: EnginePaths,
    pub config: EngineConfig,
    pub contracts: Arc<ContractLibrary>,
    pub registry: ExecutorRegistry,
}

impl Workspace {
    pub fn open(root: &Path) -> Result<Self> {
        let paths = EnginePaths::new(root);
        let config = load_config(&paths.config_path).context("load config.toml")?;
        let contracts_dir = paths.contracts_dir(&config);
        let contracts = load_contracts(&contracts_dir)
            .with_context(|| format!("load contracts from {}", contracts_dir.display()))?;
        let registry = ExecutorRegistry::from_config(
            &config.executors,
            root,
            config.executor_output_limit_bytes,
        );
        debug!(
            sources = contracts.sources().count(),
            executors = registry.len(),
            "workspace opened"
        );
        Ok(Self {
            paths,
            config,
            contracts: Arc::new(contracts),
            registry,
        })
    }

    /// A store over the active tree; nothing is read until first use.
    pub fn store(&self) -> TreeStore {
        TreeStore::open(
            &self.paths,
            Arc::clone(&self.contracts),
            self.config.max_attempts,
        )
    }

    pub fn context<'a>(&'a self, timer: &'a dyn RetryTimer) -> EngineContext<'a> {
        EngineContext::new(&self.registry, &self.contracts, timer, &self.config)
    }
}
