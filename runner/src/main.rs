//! Execution-tree engine CLI.
//!
//! Drives the active tree (`.exectree/state/tree.json`) one dispatch at a time.
//! Every state change is persisted before the next action runs, so any command
//! can be interrupted and resumed.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use exectree::core::types::{ActionOutcome, Dispatch, StalledAction};
use exectree::exit_codes;
use exectree::intervene;
use exectree::io::init::{InitOptions, init_engine};
use exectree::io::timer::SleepTimer;
use exectree::logging;
use exectree::looping::{LoopStop, run_loop};
use exectree::select::{SelectOutcome, SelectedAction, select_from_root};
use exectree::step::{StepOutcome, run_step};
use exectree::tree::GoalStatus;
use exectree::validate::validate_root;
use exectree::workspace::Workspace;

#[derive(Parser)]
#[command(
    name = "exectree",
    version,
    about = "Contract-checked execution of goal/objective/task/action trees"
)]
struct Cli {
    /// Project root containing `.exectree/`.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.exectree/` with a default config and an empty contracts directory.
    Init {
        /// Overwrite an existing layout's config.
        #[arg(short, long)]
        force: bool,
    },
    /// Check layout, config, contracts and the active tree.
    Validate,
    /// Report what the next step would do, without changing anything.
    Status,
    /// Admit a planned goal (JSON file) as the active tree.
    Insert {
        /// Path to the plan file.
        plan: PathBuf,
    },
    /// Dispatch at most one action and persist the tree.
    Step,
    /// Step until the goal completes, fails or stalls.
    Loop {
        /// Stop after this many steps.
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Mark a failed or pending action skipped.
    Skip {
        task_id: String,
        /// Zero-based position within the task.
        index: usize,
    },
    /// Return a failed action to pending with a fresh attempt budget.
    Rearm {
        task_id: String,
        /// Zero-based position within the task.
        index: usize,
    },
    /// Return every node of the active goal to its planned state.
    Reset,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.root.as_path();
    match cli.command {
        Command::Init { force } => cmd_init(root, force),
        Command::Validate => cmd_validate(root),
        Command::Status => cmd_status(root),
        Command::Insert { plan } => cmd_insert(root, &plan),
        Command::Step => cmd_step(root),
        Command::Loop { max_steps } => cmd_loop(root, max_steps),
        Command::Skip { task_id, index } => cmd_skip(root, &task_id, index),
        Command::Rearm { task_id, index } => cmd_rearm(root, &task_id, index),
        Command::Reset => cmd_reset(root),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_engine(root, &InitOptions { force })?;
    println!("initialized {}", paths.engine_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_validate(root: &Path) -> Result<i32> {
    let outcome = validate_root(root)?;
    match outcome.goal_id {
        Some(goal_id) => println!(
            "ok: goal {} ({} actions, {} contract sources, {} executors)",
            goal_id, outcome.actions, outcome.contract_sources, outcome.executors
        ),
        None => println!(
            "ok: no active goal ({} contract sources, {} executors)",
            outcome.contract_sources, outcome.executors
        ),
    }
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let code = match select_from_root(root)? {
        SelectOutcome::NoGoal => {
            println!("no active goal");
            exit_codes::OK
        }
        SelectOutcome::Complete { goal_id } => {
            println!("complete: {}", goal_id);
            exit_codes::COMPLETE
        }
        SelectOutcome::Failed { goal_id, action } => {
            println!("failed: {}", goal_id);
            if let Some(action) = action {
                println!("  {}", format_selected(&action));
            }
            exit_codes::FAILED
        }
        SelectOutcome::Open(action) => {
            println!("next: {}", format_selected(&action));
            exit_codes::OK
        }
        SelectOutcome::Stuck(action) => {
            println!("stalled: {}", format_selected(&action));
            exit_codes::STALLED
        }
    };
    Ok(code)
}

fn cmd_insert(root: &Path, plan: &Path) -> Result<i32> {
    let workspace = Workspace::open(root)?;
    let mut store = workspace.store();
    let goal_id = intervene::insert_plan(&mut store, plan)?;
    println!("inserted goal {}", goal_id);
    Ok(exit_codes::OK)
}

fn cmd_step(root: &Path) -> Result<i32> {
    let workspace = Workspace::open(root)?;
    let timer = SleepTimer;
    let ctx = workspace.context(&timer);
    let mut store = workspace.store();
    let step = run_step(&mut store, &ctx)?;
    print_step(&step);
    Ok(step_exit_code(&step))
}

fn cmd_loop(root: &Path, max_steps: Option<u32>) -> Result<i32> {
    let workspace = Workspace::open(root)?;
    let timer = SleepTimer;
    let ctx = workspace.context(&timer);
    let mut store = workspace.store();
    let outcome = run_loop(&mut store, &ctx, max_steps, print_step)?;

    let code = match &outcome.stop {
        LoopStop::Complete { .. } => exit_codes::COMPLETE,
        LoopStop::Failed { .. } => exit_codes::FAILED,
        LoopStop::Stalled(_) => exit_codes::STALLED,
        LoopStop::Interrupted { task_id, action_index } => {
            println!("interrupted at {}#{}", task_id, action_index);
            exit_codes::OK
        }
        LoopStop::MaxSteps { limit } => {
            println!("stopped after {} steps", limit);
            exit_codes::OK
        }
    };
    println!(
        "{} step(s) on goal {}",
        outcome.steps_executed,
        outcome.goal_id.as_deref().unwrap_or("-")
    );
    Ok(code)
}

fn cmd_skip(root: &Path, task_id: &str, index: usize) -> Result<i32> {
    let workspace = Workspace::open(root)?;
    let mut store = workspace.store();
    intervene::skip(&mut store, task_id, index, workspace.config.failure_policy)?;
    println!("skipped {}#{}", task_id, index);
    Ok(exit_codes::OK)
}

fn cmd_rearm(root: &Path, task_id: &str, index: usize) -> Result<i32> {
    let workspace = Workspace::open(root)?;
    let mut store = workspace.store();
    intervene::rearm(&mut store, task_id, index, workspace.config.failure_policy)?;
    println!("re-armed {}#{}", task_id, index);
    Ok(exit_codes::OK)
}

fn cmd_reset(root: &Path) -> Result<i32> {
    let workspace = Workspace::open(root)?;
    let mut store = workspace.store();
    intervene::reset(&mut store)?;
    println!("reset");
    Ok(exit_codes::OK)
}

fn step_exit_code(step: &StepOutcome) -> i32 {
    match step.goal_status {
        GoalStatus::Complete => exit_codes::COMPLETE,
        GoalStatus::Failed => exit_codes::FAILED,
        GoalStatus::Pending | GoalStatus::InProgress if step.stalled.is_some() => {
            exit_codes::STALLED
        }
        GoalStatus::Pending | GoalStatus::InProgress => exit_codes::OK,
    }
}

fn print_step(step: &StepOutcome) {
    if let Some(dispatch) = &step.dispatched {
        println!("{}", format_dispatch(dispatch));
    }
    if let Some(stalled) = &step.stalled {
        println!("stalled: {}", format_stalled(stalled));
    }
    println!("goal {}: {}", step.goal_id, step.goal_status.as_str());
    if let Some(archived) = &step.archived {
        println!("archived to {}", archived.display());
    }
}

fn format_dispatch(dispatch: &Dispatch) -> String {
    let detail = match &dispatch.outcome {
        ActionOutcome::Succeeded { attempts } => format!("succeeded after {} attempt(s)", attempts),
        ActionOutcome::Exhausted(failure) => failure.to_string(),
        ActionOutcome::Rejected(violation) => format!("rejected: {}", violation),
        ActionOutcome::Unresolved(missing) => missing.to_string(),
        ActionOutcome::Interrupted { attempts } => {
            format!("interrupted after {} attempt(s)", attempts)
        }
    };
    format!("{}#{}: {}", dispatch.task_id, dispatch.action_index, detail)
}

fn format_stalled(stalled: &StalledAction) -> String {
    let mut line = format!(
        "{}#{} {} ({} attempts)",
        stalled.task_id, stalled.action_index, stalled.capability, stalled.attempts
    );
    if let Some(error) = &stalled.last_error {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}

fn format_selected(action: &SelectedAction) -> String {
    let mut line = format!(
        "{} {} (attempts {}/{})",
        action.path, action.capability, action.attempts, action.max_attempts
    );
    if let Some(error) = &action.last_error {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}
