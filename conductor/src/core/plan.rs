//! Plan model: the ordered list of infrastructure-change steps.
//!
//! Plans are produced by the upstream planning collaborator and are read-only
//! to this crate. Loading and schema validation live in [`crate::io::plan_store`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whether a step describes a code edit or a command sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Code,
    Command,
}

/// One unit of planned infrastructure change. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Human intent for the step.
    pub description: String,
    /// The concrete change spec the oracle works from.
    pub content: String,
    pub step_type: StepType,
    /// File paths relevant to the step, in plan order. May be empty.
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

/// An ordered, immutable list of plan steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, index: usize) -> Option<&PlanStep> {
        self.steps.get(index)
    }
}
