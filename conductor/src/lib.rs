//! Plan-driven infrastructure change executor.
//!
//! Conductor walks a JSON plan of infrastructure-change steps one at a time.
//! For each step it repeatedly consults a decision oracle (an external
//! process speaking JSON over stdin/stdout), dispatches exactly one tool per
//! decision, and records every outcome in an append-only knowledge trace that
//! feeds the next consultation. A step only advances when the oracle declares
//! it finished.
//!
//! The architecture enforces a strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (decision shaping, the knowledge
//!   trace, plan and decision types). No I/O, fully testable in isolation.
//! - **[`io`]**: side-effecting operations (pty command execution, filesystem,
//!   git, the oracle subprocess, operator interaction). Every collaborator is
//!   behind a trait so the engine runs against scripted doubles in tests.
//! - **[`engine`]**: the state machine coordinating core logic with I/O.

pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
