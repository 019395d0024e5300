//! Stable exit codes for rhythm CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to I/O, parse or other runtime errors.
pub const INVALID: i32 = 1;
/// Command was rejected before any write (missing record, bad path, wrong filename).
pub const PRECONDITION: i32 = 2;
