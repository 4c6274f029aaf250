//! Development-time tracing for debugging the engine.
//!
//! Two kinds of output exist and must not be confused:
//!
//! - **Tracing (this module)**: dev diagnostics via `RUST_LOG`, written to
//!   stderr, never persisted.
//! - **Run logging ([`crate::io::run_log`])**: product artifacts in
//!   `.conductor/runs/`. Always written, unaffected by `RUST_LOG`.
//!
//! Credential values never appear in either; only credential names do.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr in compact
/// format so it never mixes with relayed command output on stdout.
///
/// # Example
/// ```bash
/// RUST_LOG=conductor=debug conductor run --plan plan.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
