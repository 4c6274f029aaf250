//! The plan step engine: a small state machine that walks the plan one step
//! at a time, consulting the oracle before every tool dispatch.
//!
//! States: select the current step, consult the oracle, dispatch one tool,
//! done. A step only ever advances when the oracle returns a terminal marker
//! (`end` or `none`); tool failures are recorded in the knowledge trace and
//! fed back into the next consultation.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::knowledge::{EntryContext, KnowledgeEntry, KnowledgeTrace};
use crate::core::plan::{Plan, PlanStep};
use crate::core::shape::shape;
use crate::core::types::{
    CompletedStepRecord, Decision, DecisionKind, StepCompletion, StepSummary, ToolResult,
};
use crate::io::config::EngineConfig;
use crate::io::context::snapshot_files;
use crate::io::oracle::{DecisionOracle, OracleContext, SummaryRequest};
use crate::io::run_log::RunLogger;
use crate::io::tools::ToolPalette;

/// Where the engine is in its consult/dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineState {
    /// Pick the current plan step, or finish when the plan is exhausted.
    SelectStep,
    /// Ask the oracle what to do for the current step.
    ConsultOracle,
    /// One decision is pending dispatch.
    DispatchTool(Decision),
    Done,
}

/// Everything mutable the engine accumulates across a run.
///
/// Invariant: `completed_steps.len() == current_step_index` whenever the
/// engine is between transitions.
#[derive(Debug, Default)]
pub struct ExecutionState {
    pub current_step_index: usize,
    /// Dispatches for the current step since it was selected (or since the
    /// last forced intervention).
    pub current_step_attempts: u32,
    /// Successful oracle consultations across the whole run.
    pub total_attempts: u64,
    pub knowledge: KnowledgeTrace,
    pub completed_steps: Vec<CompletedStepRecord>,
}

/// Drives one plan to completion against an oracle and a tool palette.
pub struct PlanStepEngine<'a> {
    plan: &'a Plan,
    oracle: &'a dyn DecisionOracle,
    palette: &'a ToolPalette<'a>,
    config: &'a EngineConfig,
    workdir: &'a Path,
    logger: Option<&'a RunLogger>,
    state: EngineState,
    exec: ExecutionState,
}

impl<'a> PlanStepEngine<'a> {
    pub fn new(
        plan: &'a Plan,
        oracle: &'a dyn DecisionOracle,
        palette: &'a ToolPalette<'a>,
        config: &'a EngineConfig,
        workdir: &'a Path,
        logger: Option<&'a RunLogger>,
    ) -> Self {
        Self {
            plan,
            oracle,
            palette,
            config,
            workdir,
            logger,
            state: EngineState::SelectStep,
            exec: ExecutionState::default(),
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn execution(&self) -> &ExecutionState {
        &self.exec
    }

    pub fn is_done(&self) -> bool {
        self.state == EngineState::Done
    }

    /// Run to completion. Only oracle `decide` failures and log write
    /// failures are fatal.
    #[instrument(skip_all, fields(steps = self.plan.len()))]
    pub fn run(&mut self) -> Result<()> {
        while !self.is_done() {
            self.tick()?;
        }
        Ok(())
    }

    /// Advance by exactly one state transition.
    pub fn tick(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, EngineState::Done);
        self.state = match state {
            EngineState::SelectStep => self.select_step()?,
            EngineState::ConsultOracle => self.consult_oracle()?,
            EngineState::DispatchTool(decision) => self.dispatch_tool(decision)?,
            EngineState::Done => EngineState::Done,
        };
        Ok(())
    }

    fn select_step(&mut self) -> Result<EngineState> {
        let index = self.exec.current_step_index;
        match self.plan.step(index) {
            Some(step) => {
                info!(
                    step = index + 1,
                    of = self.plan.len(),
                    description = %step.description,
                    "selected step"
                );
                self.exec.knowledge.begin_step(index);
                Ok(EngineState::ConsultOracle)
            }
            None => {
                info!(completed = self.exec.completed_steps.len(), "plan finished");
                if let Some(logger) = self.logger {
                    logger.run_finished(self.exec.completed_steps.len())?;
                }
                Ok(EngineState::Done)
            }
        }
    }

    fn consult_oracle(&mut self) -> Result<EngineState> {
        let index = self.exec.current_step_index;
        let step = self
            .plan
            .step(index)
            .context("consult without a current step")?;

        let ceiling = self.config.max_step_attempts;
        if ceiling > 0 && self.exec.current_step_attempts >= ceiling {
            warn!(
                step = index + 1,
                attempts = self.exec.current_step_attempts,
                "attempt ceiling reached, forcing operator intervention"
            );
            // Counter restarts after a forced intervention.
            self.exec.current_step_attempts = 0;
            let decision = Decision {
                kind: DecisionKind::AskHumanForIntervention,
                description: format!(
                    "step {} ('{}') has made {ceiling} attempts without completing; \
                     please intervene manually",
                    index + 1,
                    step.description
                ),
                content: String::new(),
                reasoning: "per-step attempt ceiling reached".to_string(),
            };
            if let Some(logger) = self.logger {
                logger.decision(index, &decision)?;
            }
            return Ok(EngineState::DispatchTool(decision));
        }

        let ctx = OracleContext {
            step_index: index,
            plan_len: self.plan.len(),
            step,
            completed: &self.exec.completed_steps,
            trace: self.exec.knowledge.render_step(index),
            snapshots: snapshot_files(self.workdir, &step.files, self.config.snapshot_limit_bytes),
            workdir: self.workdir,
            credential_names: self.config.credentials.keys().cloned().collect(),
        };
        let decision = self
            .oracle
            .decide(&ctx)
            .with_context(|| format!("oracle consultation for step {}", index + 1))?;
        // Counts every successful consultation, terminal markers included;
        // synthesized interventions above never pass through here.
        self.exec.total_attempts += 1;
        debug!(kind = decision.kind.as_tag(), "oracle decided");
        if let Some(logger) = self.logger {
            logger.decision(index, &decision)?;
        }

        if decision.kind.is_terminal() {
            let completion = match decision.kind {
                DecisionKind::None => StepCompletion::NoActionNeeded,
                _ => StepCompletion::Completed,
            };
            self.finalize_step(step.clone(), completion)?;
            return Ok(EngineState::SelectStep);
        }
        Ok(EngineState::DispatchTool(decision))
    }

    fn dispatch_tool(&mut self, decision: Decision) -> Result<EngineState> {
        let index = self.exec.current_step_index;
        let step = self
            .plan
            .step(index)
            .context("dispatch without a current step")?;
        self.exec.current_step_attempts += 1;

        let (action_json, result) = match shape(&decision, &self.exec.knowledge, index) {
            Ok(action) => {
                let json = serde_json::to_value(&action).unwrap_or(serde_json::Value::Null);
                (json, self.palette.execute(&action))
            }
            Err(err) => {
                warn!(error = %err, "decision could not be shaped");
                (
                    serde_json::json!({ "decision": decision }),
                    ToolResult::error(err.to_string()),
                )
            }
        };

        if let Some(logger) = self.logger {
            logger.tool_result(index, decision.kind.as_tag(), &result)?;
        }
        self.exec.knowledge.append(KnowledgeEntry {
            timestamp: Utc::now(),
            action_type: decision.kind.as_tag().to_string(),
            action: action_json,
            result,
            context: EntryContext {
                step_index: index,
                step_description: step.description.clone(),
                attempt: self.exec.current_step_attempts,
                reasoning: decision.reasoning,
            },
        });
        Ok(EngineState::ConsultOracle)
    }

    fn finalize_step(&mut self, step: PlanStep, completion: StepCompletion) -> Result<()> {
        let index = self.exec.current_step_index;
        let request = SummaryRequest {
            step_index: index,
            step: &step,
            trace: self.exec.knowledge.render_step(index),
            completion,
        };
        let summary = match self.oracle.summarize_step(&request) {
            Ok(summary) => summary,
            Err(err) => {
                // Degrade rather than abort: the record still marks the step
                // done, just without oracle-written learnings.
                warn!(error = %format!("{err:#}"), "summarizer failed, using local summary");
                local_summary(index, &step, completion)
            }
        };
        let record = CompletedStepRecord {
            description: step.description,
            status: completion,
            summary,
            timestamp: Utc::now(),
        };
        if let Some(logger) = self.logger {
            logger.step_completed(index, &record)?;
        }
        self.exec.completed_steps.push(record);
        self.exec.current_step_index += 1;
        self.exec.current_step_attempts = 0;
        debug_assert_eq!(
            self.exec.completed_steps.len(),
            self.exec.current_step_index
        );
        Ok(())
    }
}

fn local_summary(index: usize, step: &PlanStep, completion: StepCompletion) -> StepSummary {
    let verdict = match completion {
        StepCompletion::Completed => "completed",
        StepCompletion::NoActionNeeded => "required no action",
    };
    StepSummary {
        summary: format!("step {} ({}) {verdict}", index + 1, step.description),
        key_learnings: Vec::new(),
        forward_notes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::io::git::Git;
    use crate::test_support::{
        NullDocs, NullModifier, ScriptedHuman, ScriptedOracle, ScriptedRunner, decision, plan_of,
        transcript,
    };

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn run_engine(
        plan: &Plan,
        oracle: &ScriptedOracle,
        runner: &ScriptedRunner,
        human: &ScriptedHuman,
        config: &EngineConfig,
    ) -> ExecutionState {
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path(), Duration::from_secs(5));
        let palette = ToolPalette::new(
            runner,
            &NullModifier,
            &NullDocs,
            human,
            oracle,
            &git,
            temp.path(),
            config.command_timeout(),
        );
        let mut engine = PlanStepEngine::new(plan, oracle, &palette, config, temp.path(), None);
        engine.run().expect("run");
        assert!(engine.is_done());
        std::mem::take(&mut engine.exec)
    }

    #[test]
    fn command_step_records_success_then_completes() {
        let plan = plan_of(&["restart the web server"]);
        let oracle = ScriptedOracle::new(vec![
            decision(DecisionKind::ExecuteCommand, "run it", "echo hello"),
            decision(DecisionKind::End, "done", ""),
        ]);
        let runner = ScriptedRunner::new(vec![transcript(Some(0), "hello\n")]);
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        let entries = exec.knowledge.for_step(0);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].result.is_success());
        assert!(entries[0].result.output.as_deref().unwrap().contains("hello"));
        assert_eq!(exec.completed_steps.len(), 1);
        assert_eq!(exec.completed_steps[0].status, StepCompletion::Completed);
        assert_eq!(exec.current_step_index, 1);
        assert_eq!(exec.total_attempts, 2);
    }

    #[test]
    fn none_marker_finalizes_without_dispatch() {
        let plan = plan_of(&["nothing to do"]);
        let oracle = ScriptedOracle::new(vec![decision(DecisionKind::None, "already done", "")]);
        let runner = ScriptedRunner::new(Vec::new());
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        assert!(exec.knowledge.for_step(0).is_empty());
        assert_eq!(exec.completed_steps.len(), 1);
        assert_eq!(
            exec.completed_steps[0].status,
            StepCompletion::NoActionNeeded
        );
        assert_eq!(exec.total_attempts, 1);
    }

    /// Terminal markers come out of a consultation like any other decision, so
    /// an `end`-only step still bumps the run-wide counter.
    #[test]
    fn terminal_consultation_counts_toward_total_attempts() {
        let plan = plan_of(&["verify only"]);
        let oracle = ScriptedOracle::new(vec![decision(DecisionKind::End, "verified", "")]);
        let runner = ScriptedRunner::new(Vec::new());
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        assert_eq!(exec.total_attempts, 1);
        assert_eq!(exec.completed_steps.len(), 1);
    }

    #[test]
    fn failed_dispatch_stays_on_the_same_step() {
        let plan = plan_of(&["flaky step"]);
        let oracle = ScriptedOracle::new(vec![
            decision(DecisionKind::ExecuteCommand, "", "false"),
            decision(DecisionKind::ExecuteCommand, "", "true"),
            decision(DecisionKind::End, "", ""),
        ]);
        let runner = ScriptedRunner::new(vec![
            transcript(Some(1), "nope\n"),
            transcript(Some(0), ""),
        ]);
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        let entries = exec.knowledge.for_step(0);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].result.is_success());
        assert_eq!(entries[0].context.attempt, 1);
        assert!(entries[1].result.is_success());
        assert_eq!(entries[1].context.attempt, 2);
        assert_eq!(exec.completed_steps.len(), 1);
    }

    #[test]
    fn unknown_decision_tag_is_recorded_not_fatal() {
        let plan = plan_of(&["typo step"]);
        let oracle = ScriptedOracle::new(vec![
            decision(
                DecisionKind::Unknown("excute_command".to_string()),
                "",
                "echo hi",
            ),
            decision(DecisionKind::End, "", ""),
        ]);
        let runner = ScriptedRunner::new(Vec::new());
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        let entries = exec.knowledge.for_step(0);
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].result.is_success());
        assert!(
            entries[0]
                .result
                .error
                .as_deref()
                .unwrap()
                .contains("unknown decision type 'excute_command'")
        );
        assert_eq!(exec.completed_steps.len(), 1);
    }

    #[test]
    fn attempt_ceiling_forces_intervention_then_resets() {
        let plan = plan_of(&["stubborn step"]);
        // Two failing dispatches hit the ceiling; the forced intervention is
        // synthesized by the engine, then the oracle gets consulted again.
        let oracle = ScriptedOracle::new(vec![
            decision(DecisionKind::ExecuteCommand, "", "false"),
            decision(DecisionKind::ExecuteCommand, "", "false"),
            decision(DecisionKind::End, "operator fixed it", ""),
        ]);
        let runner = ScriptedRunner::new(vec![
            transcript(Some(1), ""),
            transcript(Some(1), ""),
        ]);
        let human = ScriptedHuman::with_responses(vec!["rebooted the host".to_string()]);
        let config = EngineConfig {
            max_step_attempts: 2,
            ..EngineConfig::default()
        };

        let exec = run_engine(&plan, &oracle, &runner, &human, &config);

        let entries = exec.knowledge.for_step(0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].action_type, "ask_human_for_intervention");
        assert!(
            entries[2]
                .result
                .output
                .as_deref()
                .unwrap()
                .contains("rebooted the host")
        );
        // Counter restarted after the forced intervention.
        assert_eq!(entries[2].context.attempt, 1);
        assert_eq!(exec.completed_steps.len(), 1);
        // The synthesized intervention involved no consultation, so only the
        // three real oracle round trips are counted.
        assert_eq!(exec.total_attempts, 3);
    }

    #[test]
    fn steps_advance_in_order() {
        let plan = plan_of(&["first", "second", "third"]);
        let oracle = ScriptedOracle::new(vec![
            decision(DecisionKind::End, "", ""),
            decision(DecisionKind::End, "", ""),
            decision(DecisionKind::End, "", ""),
        ]);
        let runner = ScriptedRunner::new(Vec::new());
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        assert_eq!(exec.completed_steps.len(), 3);
        let descriptions: Vec<&str> = exec
            .completed_steps
            .iter()
            .map(|record| record.description.as_str())
            .collect();
        assert_eq!(descriptions, vec!["first", "second", "third"]);
        assert_eq!(exec.current_step_index, 3);
    }

    #[test]
    fn summarizer_failure_degrades_to_local_summary() {
        let plan = plan_of(&["summarize me"]);
        let oracle = ScriptedOracle::new(vec![decision(DecisionKind::End, "", "")])
            .with_failing_summaries();
        let runner = ScriptedRunner::new(Vec::new());
        let human = ScriptedHuman::default();

        let exec = run_engine(&plan, &oracle, &runner, &human, &config());

        assert_eq!(exec.completed_steps.len(), 1);
        assert!(
            exec.completed_steps[0]
                .summary
                .summary
                .contains("summarize me")
        );
    }

    #[test]
    fn oracle_decide_failure_is_fatal() {
        let plan = plan_of(&["doomed step"]);
        let oracle = ScriptedOracle::new(Vec::new());
        let runner = ScriptedRunner::new(Vec::new());
        let human = ScriptedHuman::default();
        let temp = tempfile::tempdir().expect("tempdir");
        let git = Git::new(temp.path(), Duration::from_secs(5));
        let palette = ToolPalette::new(
            &runner,
            &NullModifier,
            &NullDocs,
            &human,
            &oracle,
            &git,
            temp.path(),
            Duration::from_secs(5),
        );
        let config = config();
        let mut engine = PlanStepEngine::new(&plan, &oracle, &palette, &config, temp.path(), None);
        let err = engine.run().unwrap_err();
        assert!(err.to_string().contains("oracle consultation for step 1"));
    }
}
