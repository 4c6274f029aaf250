//! Decision oracle boundary.
//!
//! The [`DecisionOracle`] trait decouples the engine from the actual oracle
//! backend. Production uses [`ExternalProcessOracle`], which spawns a
//! configured command and exchanges JSON over stdin/stdout; tests use
//! scripted oracles that return predetermined decisions.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use minijinja::{Environment, context};
use tracing::{debug, instrument};

use crate::core::plan::PlanStep;
use crate::core::types::{
    CompletedStepRecord, Decision, StepCompletion, StepSummary, ValidationVerdict,
};
use crate::io::context::FileSnapshot;
use crate::io::process::run_with_timeout;
use crate::io::tools::{CodeModifier, DocStore, ModifyOutcome, ModifyRequest};

const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");
const SUMMARY_TEMPLATE: &str = include_str!("prompts/summary.md");
const VALIDATION_TEMPLATE: &str = include_str!("prompts/validation.md");

/// Full context for one "what should happen next" consultation.
#[derive(Debug)]
pub struct OracleContext<'a> {
    pub step_index: usize,
    pub plan_len: usize,
    pub step: &'a PlanStep,
    pub completed: &'a [CompletedStepRecord],
    /// Current step's knowledge trace rendered as text, if anything was
    /// dispatched yet.
    pub trace: Option<String>,
    pub snapshots: Vec<FileSnapshot>,
    pub workdir: &'a Path,
    /// Credential names only; values never leave the engine.
    pub credential_names: Vec<String>,
}

/// Inputs for the end-of-step summarization call.
#[derive(Debug)]
pub struct SummaryRequest<'a> {
    pub step_index: usize,
    pub step: &'a PlanStep,
    pub trace: Option<String>,
    pub completion: StepCompletion,
}

/// Inputs for an oracle-backed validation capability.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// Capability tag performing the validation (for the oracle's benefit).
    pub kind: String,
    pub subject: String,
    pub instructions: String,
}

/// Opaque, fallible oracle boundary. A `decide` failure is fatal for the run;
/// a `summarize_step` failure degrades to a locally assembled summary.
pub trait DecisionOracle {
    fn decide(&self, ctx: &OracleContext<'_>) -> Result<Decision>;
    fn summarize_step(&self, request: &SummaryRequest<'_>) -> Result<StepSummary>;
    fn validate(&self, request: &ValidationRequest) -> Result<ValidationVerdict>;
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("decision", DECISION_TEMPLATE)
            .expect("decision template should be valid");
        env.add_template("summary", SUMMARY_TEMPLATE)
            .expect("summary template should be valid");
        env.add_template("validation", VALIDATION_TEMPLATE)
            .expect("validation template should be valid");
        Self { env }
    }

    fn render_decision(&self, ctx: &OracleContext<'_>) -> Result<String> {
        let template = self.env.get_template("decision")?;
        let rendered = template.render(context! {
            step_index => ctx.step_index,
            plan_len => ctx.plan_len,
            step => ctx.step,
            workdir => ctx.workdir.display().to_string(),
            completed => ctx.completed,
            trace => ctx.trace.as_deref().map(str::trim).filter(|s| !s.is_empty()),
            snapshots => ctx.snapshots,
            credentials => ctx.credential_names,
        })?;
        Ok(rendered)
    }

    fn render_summary(&self, request: &SummaryRequest<'_>) -> Result<String> {
        let template = self.env.get_template("summary")?;
        let rendered = template.render(context! {
            step_index => request.step_index,
            step => request.step,
            completion => request.completion,
            trace => request.trace.as_deref().map(str::trim).filter(|s| !s.is_empty()),
        })?;
        Ok(rendered)
    }

    fn render_validation(&self, request: &ValidationRequest) -> Result<String> {
        let template = self.env.get_template("validation")?;
        let rendered = template.render(context! {
            kind => request.kind,
            subject => request.subject,
            instructions => request.instructions,
        })?;
        Ok(rendered)
    }
}

/// Oracle that spawns an external command per round trip: the rendered
/// context goes in on stdin, one JSON document comes back on stdout. The call
/// mode (`decide`/`summarize`/`validate`) is appended as the final argument.
pub struct ExternalProcessOracle {
    command: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    prompts: PromptEngine,
}

impl ExternalProcessOracle {
    pub fn new(
        command: Vec<String>,
        workdir: PathBuf,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            command,
            workdir,
            timeout,
            output_limit_bytes,
            prompts: PromptEngine::new(),
        }
    }

    #[instrument(skip_all, fields(mode))]
    fn call(&self, mode: &str, prompt: &str) -> Result<String> {
        let program = self
            .command
            .first()
            .ok_or_else(|| anyhow!("oracle command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..])
            .arg(mode)
            .current_dir(&self.workdir);

        let out = run_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run oracle {mode}"))?;

        if out.timed_out {
            return Err(anyhow!("oracle {mode} timed out after {:?}", self.timeout));
        }
        if !out.status.success() {
            return Err(anyhow!(
                "oracle {mode} failed with status {:?}: {}",
                out.status.code(),
                out.stderr_text().trim()
            ));
        }
        debug!(mode, bytes = out.stdout.len(), "oracle responded");
        Ok(out.stdout_text())
    }
}

impl DecisionOracle for ExternalProcessOracle {
    fn decide(&self, ctx: &OracleContext<'_>) -> Result<Decision> {
        let prompt = self.prompts.render_decision(ctx)?;
        let raw = self.call("decide", &prompt)?;
        serde_json::from_str(raw.trim()).context("parse oracle decision")
    }

    fn summarize_step(&self, request: &SummaryRequest<'_>) -> Result<StepSummary> {
        let prompt = self.prompts.render_summary(request)?;
        let raw = self.call("summarize", &prompt)?;
        serde_json::from_str(raw.trim()).context("parse oracle summary")
    }

    fn validate(&self, request: &ValidationRequest) -> Result<ValidationVerdict> {
        let prompt = self.prompts.render_validation(request)?;
        let raw = self.call("validate", &prompt)?;
        serde_json::from_str(raw.trim()).context("parse oracle verdict")
    }
}

/// Code modification goes through the same external process, with the mode
/// argument set to `modify` and the request as JSON on stdin.
impl CodeModifier for ExternalProcessOracle {
    fn modify(&self, request: &ModifyRequest) -> Result<ModifyOutcome> {
        let prompt = serde_json::to_string(request).context("serialize modify request")?;
        let raw = self.call("modify", &prompt)?;
        serde_json::from_str(raw.trim()).context("parse modify outcome")
    }
}

/// Documentation lookups also multiplex over the oracle process (`lookup`
/// mode); the response is plain text, not JSON.
impl DocStore for ExternalProcessOracle {
    fn lookup(&self, query: &str) -> Result<String> {
        let raw = self.call("lookup", query)?;
        Ok(raw.trim().to_string())
    }
}
