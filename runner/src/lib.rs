//! Execution-tree engine.
//!
//! A planned goal is decomposed into objectives, tasks and ordered actions. The
//! engine walks the tree depth-first, validates each action against its
//! declared contract, dispatches it to a registered executor with bounded
//! retries, and persists the tree after every state change. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (contracts, bindings, selection,
//!   status derivation, invariants). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (filesystem, config, contracts,
//!   executor processes, retry timers).
//! - **[`exec`]**: The dispatcher and the goal/objective/task runners.
//!
//! Orchestration modules ([`step`], [`looping`], [`select`], [`validate`],
//! [`intervene`]) coordinate the layers to implement CLI commands.

pub mod core;
pub mod error;
pub mod exec;
pub mod exit_codes;
pub mod intervene;
pub mod io;
pub mod logging;
pub mod looping;
pub mod select;
pub mod step;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod tree;
pub mod validate;
pub mod workspace;
