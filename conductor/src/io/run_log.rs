//! Persistent run logs under `.conductor/runs/<run_id>/`.
//!
//! Product artifacts, always written, unaffected by `RUST_LOG`:
//! `execution.jsonl` gets one JSON line per engine event (append-only),
//! `status.log` gets one human-readable line per oracle decision for live
//! progress display.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::types::{CompletedStepRecord, Decision, ToolResult};

/// Append-only logger for one run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    dir: PathBuf,
    execution_path: PathBuf,
    status_path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum RunEvent<'a> {
    Decision {
        timestamp: DateTime<Utc>,
        step_index: usize,
        decision: &'a Decision,
    },
    ToolResult {
        timestamp: DateTime<Utc>,
        step_index: usize,
        action_type: &'a str,
        result: &'a ToolResult,
    },
    StepCompleted {
        timestamp: DateTime<Utc>,
        step_index: usize,
        record: &'a CompletedStepRecord,
    },
    RunFinished {
        timestamp: DateTime<Utc>,
        completed_steps: usize,
    },
}

impl RunLogger {
    /// Create the run directory and both log files.
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let dir = root.join(".conductor").join("runs").join(run_id);
        fs::create_dir_all(&dir).with_context(|| format!("create run dir {}", dir.display()))?;
        Ok(Self {
            run_id: run_id.to_string(),
            execution_path: dir.join("execution.jsonl"),
            status_path: dir.join("status.log"),
            dir,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn decision(&self, step_index: usize, decision: &Decision) -> Result<()> {
        self.append_event(&RunEvent::Decision {
            timestamp: Utc::now(),
            step_index,
            decision,
        })?;
        let tagline = decision.kind.as_tag();
        let summary = if decision.description.trim().is_empty() {
            decision.reasoning.trim()
        } else {
            decision.description.trim()
        };
        self.append_status(&format!("step {} | {tagline} | {summary}", step_index + 1))
    }

    pub fn tool_result(
        &self,
        step_index: usize,
        action_type: &str,
        result: &ToolResult,
    ) -> Result<()> {
        self.append_event(&RunEvent::ToolResult {
            timestamp: Utc::now(),
            step_index,
            action_type,
            result,
        })
    }

    pub fn step_completed(&self, step_index: usize, record: &CompletedStepRecord) -> Result<()> {
        self.append_event(&RunEvent::StepCompleted {
            timestamp: Utc::now(),
            step_index,
            record,
        })?;
        self.append_status(&format!(
            "step {} | completed | {}",
            step_index + 1,
            record.summary.summary.trim()
        ))
    }

    pub fn run_finished(&self, completed_steps: usize) -> Result<()> {
        self.append_event(&RunEvent::RunFinished {
            timestamp: Utc::now(),
            completed_steps,
        })
    }

    fn append_event(&self, event: &RunEvent<'_>) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize run event")?;
        line.push('\n');
        append(&self.execution_path, &line)
    }

    fn append_status(&self, line: &str) -> Result<()> {
        append(&self.status_path, &format!("{line}\n"))
    }
}

fn append(path: &Path, contents: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(contents.as_bytes())
        .with_context(|| format!("append {}", path.display()))
}

/// Generate a fresh run id from the current UTC time.
pub fn new_run_id() -> String {
    format!("run-{}", Utc::now().format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{DecisionKind, StepCompletion, StepSummary, ToolStatus};

    fn decision() -> Decision {
        Decision {
            kind: DecisionKind::ExecuteCommand,
            description: "run the restart".to_string(),
            content: "systemctl restart nginx".to_string(),
            reasoning: "config changed".to_string(),
        }
    }

    #[test]
    fn events_append_in_order_as_jsonl() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = RunLogger::create(temp.path(), "run-1").expect("create");

        logger.decision(0, &decision()).expect("decision");
        logger
            .tool_result(0, "execute_command", &ToolResult::success("ok"))
            .expect("tool result");
        logger.run_finished(1).expect("finished");

        let raw = fs::read_to_string(logger.execution_path.clone()).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(first["event"], "decision");
        let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
        assert_eq!(second["event"], "tool_result");
        assert_eq!(second["result"]["status"], "success");
        assert_eq!(
            second["result"]["status"],
            serde_json::to_value(ToolStatus::Success).expect("status")
        );
    }

    #[test]
    fn status_log_gets_one_line_per_decision() {
        let temp = tempfile::tempdir().expect("tempdir");
        let logger = RunLogger::create(temp.path(), "run-2").expect("create");

        logger.decision(0, &decision()).expect("decision");
        logger
            .step_completed(
                0,
                &CompletedStepRecord {
                    description: "restart".to_string(),
                    status: StepCompletion::Completed,
                    summary: StepSummary {
                        summary: "nginx restarted".to_string(),
                        ..StepSummary::default()
                    },
                    timestamp: Utc::now(),
                },
            )
            .expect("completed");

        let status = fs::read_to_string(logger.status_path.clone()).expect("read");
        assert!(status.contains("step 1 | execute_command | run the restart"));
        assert!(status.contains("step 1 | completed | nginx restarted"));
    }

    #[test]
    fn run_ids_are_prefixed() {
        assert!(new_run_id().starts_with("run-"));
    }
}
