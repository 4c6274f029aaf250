//! Stable exit codes for conductor CLI commands.

/// Command succeeded; for `run`, every plan step completed.
pub const OK: i32 = 0;
/// Invalid plan/config or any other error, including a failed oracle
/// consultation.
pub const INVALID: i32 = 1;
/// `conductor exec` killed the command for inactivity.
pub const TIMED_OUT: i32 = 124;
