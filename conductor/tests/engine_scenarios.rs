//! End-to-end engine scenarios, including one against the real pty runner.

use std::fs;
use std::time::Duration;

use conductor::core::types::{DecisionKind, StepCompletion};
use conductor::engine::PlanStepEngine;
use conductor::io::config::EngineConfig;
use conductor::io::git::Git;
use conductor::io::interactive::InteractiveRunner;
use conductor::io::run_log::RunLogger;
use conductor::io::tools::ToolPalette;
use conductor::test_support::{
    NullDocs, NullModifier, ScriptedHuman, ScriptedOracle, ScriptedRunner, decision, plan_of,
    temp_workdir, timed_out_transcript, transcript,
};

#[test]
fn real_pty_command_step_runs_to_completion() {
    let workdir = temp_workdir();
    let plan = plan_of(&["print a greeting"]);
    let oracle = ScriptedOracle::new(vec![
        decision(DecisionKind::ExecuteCommand, "greet", "echo hello"),
        decision(DecisionKind::End, "greeted", ""),
    ]);
    let runner = InteractiveRunner::new(
        workdir.path().to_path_buf(),
        Duration::from_millis(50),
        100_000,
    );
    let human = ScriptedHuman::default();
    let git = Git::new(workdir.path(), Duration::from_secs(5));
    let config = EngineConfig::default();
    let palette = ToolPalette::new(
        &runner,
        &NullModifier,
        &NullDocs,
        &human,
        &oracle,
        &git,
        workdir.path(),
        Duration::from_secs(10),
    );

    let mut engine = PlanStepEngine::new(&plan, &oracle, &palette, &config, workdir.path(), None);
    engine.run().expect("run");

    let exec = engine.execution();
    let entries = exec.knowledge.for_step(0);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].result.is_success());
    assert!(entries[0].result.output.as_deref().unwrap().contains("hello"));
    assert_eq!(exec.completed_steps.len(), 1);
    assert_eq!(exec.completed_steps[0].status, StepCompletion::Completed);
}

#[test]
fn inactivity_timeout_is_recorded_and_the_step_continues() {
    let workdir = temp_workdir();
    let plan = plan_of(&["slow step"]);
    let oracle = ScriptedOracle::new(vec![
        decision(DecisionKind::ExecuteCommand, "", "sleep 999"),
        decision(DecisionKind::End, "gave up waiting", ""),
    ]);
    let runner = ScriptedRunner::new(vec![timed_out_transcript("started\n")]);
    let human = ScriptedHuman::default();
    let git = Git::new(workdir.path(), Duration::from_secs(5));
    let config = EngineConfig::default();
    let palette = ToolPalette::new(
        &runner,
        &NullModifier,
        &NullDocs,
        &human,
        &oracle,
        &git,
        workdir.path(),
        Duration::from_secs(1),
    );

    let mut engine = PlanStepEngine::new(&plan, &oracle, &palette, &config, workdir.path(), None);
    engine.run().expect("run");

    let exec = engine.execution();
    let entries = exec.knowledge.for_step(0);
    assert_eq!(entries.len(), 1);
    assert!(!entries[0].result.is_success());
    let error = entries[0].result.error.as_deref().unwrap();
    assert!(error.contains("inactivity"), "unexpected error: {error}");
    // Partial transcript survives the kill.
    assert_eq!(entries[0].result.output.as_deref(), Some("started\n"));
    assert_eq!(entries[0].context.attempt, 1);
    // The oracle, not the timeout, decides what happens next.
    assert_eq!(exec.completed_steps.len(), 1);
}

#[test]
fn multi_step_plan_completes_in_order_with_run_logs() {
    let workdir = temp_workdir();
    let plan = plan_of(&["prepare", "apply", "verify"]);
    let oracle = ScriptedOracle::new(vec![
        decision(DecisionKind::ExecuteCommand, "", "true"),
        decision(DecisionKind::End, "prepared", ""),
        decision(DecisionKind::End, "nothing to apply", ""),
        decision(DecisionKind::None, "already verified", ""),
    ]);
    let runner = ScriptedRunner::new(vec![transcript(Some(0), "done\n")]);
    let human = ScriptedHuman::default();
    let git = Git::new(workdir.path(), Duration::from_secs(5));
    let config = EngineConfig::default();
    let palette = ToolPalette::new(
        &runner,
        &NullModifier,
        &NullDocs,
        &human,
        &oracle,
        &git,
        workdir.path(),
        Duration::from_secs(5),
    );
    let logger = RunLogger::create(workdir.path(), "run-test").expect("logger");

    let mut engine = PlanStepEngine::new(
        &plan,
        &oracle,
        &palette,
        &config,
        workdir.path(),
        Some(&logger),
    );
    engine.run().expect("run");

    let exec = engine.execution();
    assert_eq!(exec.completed_steps.len(), 3);
    assert_eq!(exec.completed_steps[0].status, StepCompletion::Completed);
    assert_eq!(
        exec.completed_steps[2].status,
        StepCompletion::NoActionNeeded
    );
    assert_eq!(exec.current_step_index, 3);

    // One consultation per decision, steps visited in order.
    assert_eq!(*oracle.consultations.borrow(), vec![0, 0, 1, 2]);

    let raw = fs::read_to_string(
        workdir
            .path()
            .join(".conductor/runs/run-test/execution.jsonl"),
    )
    .expect("read execution log");
    let events: Vec<serde_json::Value> = raw
        .lines()
        .map(|line| serde_json::from_str(line).expect("jsonl line"))
        .collect();
    assert_eq!(
        events.last().map(|event| event["event"].clone()),
        Some(serde_json::Value::String("run_finished".to_string()))
    );
    assert!(
        events
            .iter()
            .filter(|event| event["event"] == "step_completed")
            .count()
            == 3
    );

    let status = fs::read_to_string(workdir.path().join(".conductor/runs/run-test/status.log"))
        .expect("read status log");
    assert!(status.contains("step 1 | execute_command"));
    assert!(status.contains("step 3 | none | already verified"));
}

#[test]
fn operator_answers_flow_into_the_trace() {
    let workdir = temp_workdir();
    let plan = plan_of(&["which region?"]);
    let oracle = ScriptedOracle::new(vec![
        decision(
            DecisionKind::AskHumanForInformation,
            "which region should this deploy to?",
            "",
        ),
        decision(DecisionKind::End, "", ""),
    ]);
    let runner = ScriptedRunner::new(Vec::new());
    let human = ScriptedHuman::with_responses(vec!["eu-west-1".to_string()]);
    let git = Git::new(workdir.path(), Duration::from_secs(5));
    let config = EngineConfig::default();
    let palette = ToolPalette::new(
        &runner,
        &NullModifier,
        &NullDocs,
        &human,
        &oracle,
        &git,
        workdir.path(),
        Duration::from_secs(5),
    );

    let mut engine = PlanStepEngine::new(&plan, &oracle, &palette, &config, workdir.path(), None);
    engine.run().expect("run");

    let entries = engine.execution().knowledge.for_step(0);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action_type, "ask_human_for_information");
    assert_eq!(entries[0].result.output.as_deref(), Some("eu-west-1"));
    assert_eq!(
        human.prompts.borrow().as_slice(),
        ["which region should this deploy to?"]
    );
}
