//! Workspace layout under `.exectree/` and its scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use crate::io::config::{EngineConfig, write_config};

/// All canonical paths within `.exectree/` for a project root.
#[derive(Debug, Clone)]
pub struct EnginePaths {
    pub root: PathBuf,
    pub engine_dir: PathBuf,
    pub state_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub tree_path: PathBuf,
    pub config_path: PathBuf,
}

impl EnginePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let engine_dir = root.join(".exectree");
        let state_dir = engine_dir.join("state");
        Self {
            root,
            archive_dir: engine_dir.join("archive"),
            tree_path: state_dir.join("tree.json"),
            config_path: state_dir.join("config.toml"),
            state_dir,
            engine_dir,
        }
    }

    /// Contracts directory named by `cfg`, resolved against the project root.
    pub fn contracts_dir(&self, cfg: &EngineConfig) -> PathBuf {
        self.root.join(&cfg.contracts_dir)
    }
}

/// Options for `init_engine`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// If true, overwrite the existing config file.
    pub force: bool,
}

/// Create `.exectree/` scaffolding in `root`: state, archive and contracts
/// directories plus a default `config.toml`.
///
/// Fails if `.exectree/` already exists unless `options.force` is set. Force
/// rewrites the config but never touches the active tree or the archive.
pub fn init_engine(root: &Path, options: &InitOptions) -> Result<EnginePaths> {
    let paths = EnginePaths::new(root);
    if paths.engine_dir.exists() && !paths.engine_dir.is_dir() {
        return Err(anyhow!("exectree init: .exectree exists but is not a directory"));
    }
    if paths.engine_dir.exists() && !options.force {
        return Err(anyhow!(
            "exectree init: .exectree already exists (use --force to overwrite)"
        ));
    }

    let cfg = EngineConfig::default();
    for dir in [
        &paths.state_dir,
        &paths.archive_dir,
        &paths.contracts_dir(&cfg),
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    write_config(&paths.config_path, &cfg)?;
    info!(root = %root.display(), "initialized .exectree");
    Ok(paths)
}
