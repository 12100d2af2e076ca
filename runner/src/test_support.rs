//! Test-only helpers: tree builders, a scripted executor, an instant timer and a
//! scratch workspace.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value, json};
use tempfile::TempDir;

use crate::core::contract::{ActionContract, ArgDeclaration, ContractLibrary};
use crate::core::types::FailurePolicy;
use crate::exec::{EngineContext, RetryPolicy};
use crate::io::config::{EngineConfig, write_config};
use crate::io::contracts::load_contracts;
use crate::io::executor::{Executor, ExecutorRegistry, Outcome};
use crate::io::init::{EnginePaths, InitOptions, init_engine};
use crate::io::timer::{RetryTimer, WaitOutcome};
use crate::io::tree_store::TreeStore;
use crate::tree::{Action, Goal, Objective, Task};

/// Build a pending action. `args` must be a JSON object.
pub fn action(source: &str, name: &str, args: Value) -> Action {
    let input_args = match args {
        Value::Object(map) => map,
        other => panic!("action args must be an object, got {other}"),
    };
    Action::new(source, name, input_args)
}

/// Contracts for `mouse.click(x, y)` and `keyboard.type_text(text, delay_ms = 20)`.
pub fn contracts() -> ContractLibrary {
    let mut library = ContractLibrary::new();
    library.insert(
        "mouse",
        ActionContract {
            name: "click".to_string(),
            input_args: ArgDeclaration::Names(vec!["x".to_string(), "y".to_string()]),
            defaults: Map::new(),
        },
    );
    let mut defaults = Map::new();
    defaults.insert("delay_ms".to_string(), json!(20));
    library.insert(
        "keyboard",
        ActionContract {
            name: "type_text".to_string(),
            input_args: ArgDeclaration::Names(vec!["text".to_string(), "delay_ms".to_string()]),
            defaults,
        },
    );
    library
}

/// Goal `g1` with objective `o1` and a single task `t1` holding `actions`.
pub fn goal_with_actions(actions: Vec<Action>) -> Goal {
    goal_with_tasks(vec![actions])
}

/// Goal `g1` with objective `o1`; task ids are `t1`, `t2`, ... in order.
pub fn goal_with_tasks(tasks: Vec<Vec<Action>>) -> Goal {
    let tasks = tasks
        .into_iter()
        .enumerate()
        .map(|(index, actions)| {
            let task_id = format!("t{}", index + 1);
            Task::new(&task_id, "o1", &format!("{} description", task_id), actions)
        })
        .collect();
    Goal::new(
        "g1",
        "g1 description",
        vec![Objective::new("o1", "g1", "o1 description", tasks)],
    )
}

/// One scripted executor response.
#[derive(Debug, Clone)]
pub enum Scripted {
    Succeed(Option<Value>),
    Fail(String),
    Error(String),
    Panic(String),
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<Scripted>,
    calls: Vec<Map<String, Value>>,
}

/// Executor that replays a script and records the arguments of every call.
///
/// Clones share state, so a test can keep one clone for inspection after
/// registering another. An exhausted script succeeds with no output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    state: Rc<RefCell<ScriptState>>,
}

impl ScriptedExecutor {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            state: Rc::new(RefCell::new(ScriptState {
                script: script.into(),
                calls: Vec::new(),
            })),
        }
    }

    pub fn calls(&self) -> Vec<Map<String, Value>> {
        self.state.borrow().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.borrow().calls.len()
    }
}

impl Executor for ScriptedExecutor {
    fn invoke(&self, args: &Map<String, Value>) -> Result<Outcome> {
        let next = {
            let mut state = self.state.borrow_mut();
            state.calls.push(args.clone());
            state.script.pop_front()
        };
        match next {
            None => Ok(Outcome::success(None)),
            Some(Scripted::Succeed(output)) => Ok(Outcome::success(output)),
            Some(Scripted::Fail(error)) => Ok(Outcome::failure(error)),
            Some(Scripted::Error(error)) => Err(anyhow!(error)),
            Some(Scripted::Panic(message)) => panic!("{message}"),
        }
    }
}

/// Timer that returns immediately and records every requested wait.
///
/// `cancel_on` makes the n-th wait (1-based) report cancellation.
#[derive(Debug, Clone, Default)]
pub struct InstantTimer {
    waits: Rc<RefCell<Vec<Duration>>>,
    cancel_on: Option<usize>,
}

impl InstantTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancelling_on(wait_number: usize) -> Self {
        Self {
            waits: Rc::default(),
            cancel_on: Some(wait_number),
        }
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.borrow().clone()
    }
}

impl RetryTimer for InstantTimer {
    fn wait(&self, duration: Duration) -> WaitOutcome {
        let mut waits = self.waits.borrow_mut();
        waits.push(duration);
        if self.cancel_on == Some(waits.len()) {
            WaitOutcome::Cancelled
        } else {
            WaitOutcome::Elapsed
        }
    }
}

/// In-memory dispatch setup: the test contracts, one scripted executor
/// registered for every contracted capability, and an instant timer.
pub struct TestEngine {
    pub registry: ExecutorRegistry,
    pub contracts: ContractLibrary,
    pub executor: ScriptedExecutor,
    pub timer: InstantTimer,
    pub retry: RetryPolicy,
    pub failure_policy: FailurePolicy,
}

impl TestEngine {
    pub fn new(script: Vec<Scripted>) -> Self {
        let executor = ScriptedExecutor::new(script);
        let mut registry = ExecutorRegistry::new();
        registry.register("mouse", "click", executor.clone());
        registry.register("keyboard", "type_text", executor.clone());
        Self {
            registry,
            contracts: contracts(),
            executor,
            timer: InstantTimer::new(),
            retry: RetryPolicy {
                max_attempts: 3,
                retry_delay: Duration::from_millis(100),
                action_delay: Duration::ZERO,
            },
            failure_policy: FailurePolicy::Stall,
        }
    }

    pub fn ctx(&self) -> EngineContext<'_> {
        EngineContext {
            registry: &self.registry,
            contracts: &self.contracts,
            timer: &self.timer,
            retry: self.retry,
            failure_policy: self.failure_policy,
        }
    }
}

/// Scratch project root with an initialized `.exectree/` and the test contracts on disk.
pub struct TestWorkspace {
    temp: TempDir,
    pub paths: EnginePaths,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = init_engine(temp.path(), &InitOptions::default())?;
        let contracts_dir = paths.contracts_dir(&EngineConfig::default());
        fs::write(
            contracts_dir.join("mouse.json"),
            serde_json::to_string_pretty(&json!({
                "actions": [{"name": "click", "input_args": ["x", "y"]}]
            }))?,
        )?;
        fs::write(
            contracts_dir.join("keyboard.json"),
            serde_json::to_string_pretty(&json!([{
                "name": "type_text",
                "input_args": ["text", "delay_ms"],
                "defaults": {"delay_ms": 20}
            }]))?,
        )?;
        Ok(Self { temp, paths })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn write_config(&self, cfg: &EngineConfig) -> Result<()> {
        write_config(&self.paths.config_path, cfg)
    }

    /// Open a store over this workspace using the on-disk contracts.
    pub fn open_store(&self, attempt_ceiling: u32) -> Result<TreeStore> {
        let contracts = load_contracts(&self.paths.contracts_dir(&EngineConfig::default()))?;
        Ok(TreeStore::open(&self.paths, Arc::new(contracts), attempt_ceiling))
    }

    /// Insert `goal` as the active tree.
    pub fn insert(&self, goal: Goal) -> Result<()> {
        let mut store = self.open_store(EngineConfig::default().max_attempts)?;
        store.insert(goal)?;
        Ok(())
    }

    pub fn read_tree(&self) -> Result<Goal> {
        let contents = fs::read_to_string(&self.paths.tree_path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
