//! Scripted collaborator doubles for engine tests.
//!
//! Only compiled with the `test-support` feature, which the crate's own
//! dev-dependency enables.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::{Context, Result, bail};

use crate::core::plan::{Plan, PlanStep, StepType};
use crate::core::types::{Decision, DecisionKind, StepSummary, ValidationVerdict};
use crate::io::human::HumanChannel;
use crate::io::interactive::{CommandRequest, CommandRunner, CommandTranscript};
use crate::io::oracle::{DecisionOracle, OracleContext, SummaryRequest, ValidationRequest};
use crate::io::tools::{CodeModifier, DocStore, ModifyOutcome, ModifyRequest};

/// Fresh temporary working directory for engine tests.
pub fn temp_workdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp workdir")
}

/// Build a plan of command steps from descriptions.
pub fn plan_of(descriptions: &[&str]) -> Plan {
    Plan {
        steps: descriptions
            .iter()
            .map(|description| PlanStep {
                description: (*description).to_string(),
                content: String::new(),
                step_type: StepType::Command,
                files: Vec::new(),
            })
            .collect(),
    }
}

pub fn decision(kind: DecisionKind, description: &str, content: &str) -> Decision {
    Decision {
        kind,
        description: description.to_string(),
        content: content.to_string(),
        reasoning: String::new(),
    }
}

pub fn transcript(exit_code: Option<i32>, transcript: &str) -> CommandTranscript {
    CommandTranscript {
        exit_code,
        transcript: transcript.to_string(),
        timed_out: false,
        truncated: 0,
    }
}

pub fn timed_out_transcript(partial: &str) -> CommandTranscript {
    CommandTranscript {
        exit_code: None,
        transcript: partial.to_string(),
        timed_out: true,
        truncated: 0,
    }
}

/// Oracle double that returns a fixed queue of decisions.
pub struct ScriptedOracle {
    decisions: RefCell<VecDeque<Decision>>,
    fail_summaries: bool,
    verdict: ValidationVerdict,
    pub consultations: RefCell<Vec<usize>>,
}

impl ScriptedOracle {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: RefCell::new(decisions.into()),
            fail_summaries: false,
            verdict: ValidationVerdict {
                passed: true,
                notes: String::new(),
            },
            consultations: RefCell::new(Vec::new()),
        }
    }

    pub fn with_failing_summaries(mut self) -> Self {
        self.fail_summaries = true;
        self
    }

    pub fn with_verdict(mut self, verdict: ValidationVerdict) -> Self {
        self.verdict = verdict;
        self
    }
}

impl DecisionOracle for ScriptedOracle {
    fn decide(&self, ctx: &OracleContext<'_>) -> Result<Decision> {
        self.consultations.borrow_mut().push(ctx.step_index);
        self.decisions
            .borrow_mut()
            .pop_front()
            .context("scripted oracle has no more decisions")
    }

    fn summarize_step(&self, request: &SummaryRequest<'_>) -> Result<StepSummary> {
        if self.fail_summaries {
            bail!("scripted summarizer failure");
        }
        Ok(StepSummary {
            summary: format!("summarized step {}", request.step_index + 1),
            key_learnings: Vec::new(),
            forward_notes: Vec::new(),
        })
    }

    fn validate(&self, _request: &ValidationRequest) -> Result<ValidationVerdict> {
        Ok(self.verdict.clone())
    }
}

/// Command runner double that replays a fixed queue of transcripts and
/// records each command line it was asked to run.
pub struct ScriptedRunner {
    transcripts: RefCell<VecDeque<CommandTranscript>>,
    pub commands: RefCell<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new(transcripts: Vec<CommandTranscript>) -> Self {
        Self {
            transcripts: RefCell::new(transcripts.into()),
            commands: RefCell::new(Vec::new()),
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, request: &CommandRequest) -> Result<CommandTranscript> {
        self.commands.borrow_mut().push(request.command.clone());
        self.transcripts
            .borrow_mut()
            .pop_front()
            .context("scripted runner has no more transcripts")
    }
}

/// Operator double. Pops queued responses, answering "ok" once exhausted.
#[derive(Default)]
pub struct ScriptedHuman {
    responses: RefCell<VecDeque<String>>,
    pub prompts: RefCell<Vec<String>>,
}

impl ScriptedHuman {
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: RefCell::new(responses.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    fn respond(&self, prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| "ok".to_string()))
    }
}

impl HumanChannel for ScriptedHuman {
    fn ask_information(&self, prompt: &str) -> Result<String> {
        self.respond(prompt)
    }

    fn ask_intervention(&self, explanation: &str) -> Result<String> {
        self.respond(explanation)
    }
}

/// Code modifier double that refuses every request.
pub struct NullModifier;

impl CodeModifier for NullModifier {
    fn modify(&self, _request: &ModifyRequest) -> Result<ModifyOutcome> {
        bail!("code modification not available in this test")
    }
}

/// Documentation store double that refuses every query.
pub struct NullDocs;

impl DocStore for NullDocs {
    fn lookup(&self, _query: &str) -> Result<String> {
        bail!("documentation lookup not available in this test")
    }
}
