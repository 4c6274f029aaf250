//! Loading and schema validation for plan files.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use jsonschema::Draft;
use serde_json::Value;
use tracing::debug;

use crate::core::plan::Plan;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");

/// Load a plan file, enforcing schema conformance before parsing it into
/// typed steps.
pub fn load_plan(path: &Path) -> Result<Plan> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read plan {}", path.display()))?;
    let plan = parse_plan(&contents).with_context(|| format!("validate {}", path.display()))?;
    debug!(steps = plan.len(), "plan loaded");
    Ok(plan)
}

/// Parse and validate a plan document: schema conformance plus semantic
/// checks the schema cannot express.
pub fn parse_plan(contents: &str) -> Result<Plan> {
    let instance: Value = serde_json::from_str(contents).context("parse plan json")?;
    let schema: Value = serde_json::from_str(PLAN_SCHEMA).context("parse plan schema")?;
    validate_schema(&instance, &schema)?;
    let plan: Plan = serde_json::from_str(contents).context("parse plan steps")?;
    if plan.is_empty() {
        bail!("plan has no steps");
    }
    Ok(plan)
}

/// Validate JSON instance against a JSON Schema (Draft 2020-12).
fn validate_schema(instance: &Value, schema: &Value) -> Result<()> {
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(schema)
        .context("compile plan schema")?;
    let messages: Vec<String> = compiled
        .iter_errors(instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        bail!("plan schema validation failed:\n- {}", messages.join("\n- "));
    }
    Ok(())
}
