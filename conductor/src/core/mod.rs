//! Pure, deterministic logic: plan model, decision types, knowledge trace,
//! and decision-to-tool input shaping. No I/O; fully testable in isolation.

pub mod knowledge;
pub mod plan;
pub mod shape;
pub mod types;
