//! Orchestration for a single persisted engine tick (`exectree step`).

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{info, instrument};

use crate::core::types::{Dispatch, StalledAction};
use crate::exec::EngineContext;
use crate::exec::goal::run_goal;
use crate::io::tree_store::TreeStore;
use crate::tree::GoalStatus;

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub goal_id: String,
    /// True if the tree changed and was persisted.
    pub advanced: bool,
    pub goal_status: GoalStatus,
    /// The action dispatched during this step, if any.
    pub dispatched: Option<Dispatch>,
    /// The action blocking progress, if the active path is blocked.
    pub stalled: Option<StalledAction>,
    /// Archive file written when the goal turned terminal.
    pub archived: Option<PathBuf>,
}

/// Execute one tick: load the active goal, run it once, persist, and archive it
/// once it is terminal.
///
/// A terminal goal left in place by an interrupted earlier tick is archived
/// without dispatching anything.
#[instrument(skip_all)]
pub fn run_step(store: &mut TreeStore, ctx: &EngineContext<'_>) -> Result<StepOutcome> {
    if !store.has_active_goal() {
        bail!(
            "no active goal at {} (insert a plan first)",
            store.tree_path().display()
        );
    }
    let goal = store.ensure_loaded().context("load active goal")?;
    let before = goal.clone();
    let report = run_goal(goal, ctx);
    let advanced = *goal != before;
    let goal_id = goal.goal_id.clone();
    let goal_status = goal.status;

    if advanced {
        store.persist().context("persist tree after step")?;
    }
    let archived = if goal_status.is_terminal() {
        Some(store.archive(Utc::now()).context("archive terminal goal")?)
    } else {
        None
    };

    info!(
        goal_id = %goal_id,
        advanced,
        status = goal_status.as_str(),
        dispatched = report.dispatched.as_ref().map(|d| d.outcome.label()),
        "step finished"
    );
    let stalled = report.stalled().cloned();
    Ok(StepOutcome {
        goal_id,
        advanced,
        goal_status,
        dispatched: report.dispatched,
        stalled,
        archived,
    })
}
