//! Loading action contracts from `<contracts_dir>/<source>.json`.
//!
//! Each file declares the actions of one source, either wrapped as
//! `{"actions": [...]}` or as a bare list. The file stem is the source name.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::contract::{ActionContract, ContractLibrary};

#[derive(Deserialize)]
#[serde(untagged)]
enum ContractFile {
    Wrapped { actions: Vec<ActionContract> },
    List(Vec<ActionContract>),
}

impl ContractFile {
    fn into_actions(self) -> Vec<ActionContract> {
        match self {
            ContractFile::Wrapped { actions } | ContractFile::List(actions) => actions,
        }
    }
}

/// Load every `*.json` file in `dir` into a library. A missing directory yields an empty library.
pub fn load_contracts(dir: &Path) -> Result<ContractLibrary> {
    let mut library = ContractLibrary::new();
    if !dir.exists() {
        warn!(dir = %dir.display(), "contracts directory missing; no actions are declared");
        return Ok(library);
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read entry in {}", dir.display()))?
            .path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let Some(source) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let file: ContractFile = serde_json::from_str(&contents)
            .with_context(|| format!("parse contracts {}", path.display()))?;
        let actions = file.into_actions();
        debug!(source, actions = actions.len(), "loaded contracts");
        for contract in actions {
            library.insert(source, contract);
        }
    }
    Ok(library)
}
