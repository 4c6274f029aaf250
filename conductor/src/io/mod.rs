//! Side-effecting boundary: process execution, terminal control, filesystem,
//! git, operator interaction, and the external oracle process.

pub mod config;
pub mod context;
pub mod git;
pub mod human;
pub mod interactive;
pub mod oracle;
pub mod plan_store;
pub mod process;
pub mod pty;
pub mod run_log;
pub mod tools;
