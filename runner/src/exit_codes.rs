//! Stable exit codes for exectree CLI commands.

/// Command succeeded, or the tree still has work to do.
pub const OK: i32 = 0;
/// Command failed due to invalid layout/config/contracts/tree or other errors.
pub const INVALID: i32 = 1;
/// The goal is complete (or would complete on the next step).
pub const COMPLETE: i32 = 2;
/// A failed action blocks the active path and needs `skip` or `rearm`.
pub const STALLED: i32 = 3;
/// The goal failed under the `escalate` failure policy.
pub const FAILED: i32 = 4;
