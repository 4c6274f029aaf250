//! The tool palette: the fixed set of capabilities the engine can dispatch.
//!
//! Every capability fault is folded into an error [`ToolResult`] so a failing
//! tool never aborts the run. The oracle sees the failure in the knowledge
//! trace and decides what to do next.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::shape::ToolAction;
use crate::core::types::ToolResult;
use crate::io::git::Git;
use crate::io::human::HumanChannel;
use crate::io::interactive::{CommandRequest, CommandRunner};
use crate::io::oracle::{DecisionOracle, ValidationRequest};

/// One code modification request, forwarded verbatim from the oracle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModifyRequest {
    /// What to change, in the oracle's words.
    pub content: String,
    pub description: String,
}

/// What a code modification produced.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ModifyOutcome {
    /// Human-readable account of the change (diff or summary).
    pub summary: String,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

/// Applies code changes in the working tree.
pub trait CodeModifier {
    fn modify(&self, request: &ModifyRequest) -> Result<ModifyOutcome>;
}

/// Answers documentation queries.
pub trait DocStore {
    fn lookup(&self, query: &str) -> Result<String>;
}

/// The dispatcher owning every capability's collaborators.
pub struct ToolPalette<'a> {
    runner: &'a dyn CommandRunner,
    modifier: &'a dyn CodeModifier,
    docs: &'a dyn DocStore,
    human: &'a dyn HumanChannel,
    oracle: &'a dyn DecisionOracle,
    git: &'a Git,
    workdir: PathBuf,
    command_timeout: std::time::Duration,
}

impl<'a> ToolPalette<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: &'a dyn CommandRunner,
        modifier: &'a dyn CodeModifier,
        docs: &'a dyn DocStore,
        human: &'a dyn HumanChannel,
        oracle: &'a dyn DecisionOracle,
        git: &'a Git,
        workdir: impl Into<PathBuf>,
        command_timeout: std::time::Duration,
    ) -> Self {
        Self {
            runner,
            modifier,
            docs,
            human,
            oracle,
            git,
            workdir: workdir.into(),
            command_timeout,
        }
    }

    /// Dispatch one shaped action. Never fails: faults become error results.
    pub fn execute(&self, action: &ToolAction) -> ToolResult {
        let outcome = self.dispatch(action);
        match outcome {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "tool dispatch fault");
                ToolResult::error(format!("{err:#}"))
            }
        }
    }

    fn dispatch(&self, action: &ToolAction) -> Result<ToolResult> {
        match action {
            ToolAction::ExecuteCommand { command } => self.run_command(command),
            ToolAction::ModifyCode {
                content,
                description,
            } => {
                let outcome = self.modifier.modify(&ModifyRequest {
                    content: content.clone(),
                    description: description.clone(),
                })?;
                let mut output = outcome.summary;
                if !outcome.changed_files.is_empty() {
                    output.push_str("\nchanged files: ");
                    output.push_str(&outcome.changed_files.join(", "));
                }
                Ok(ToolResult::success(output))
            }
            ToolAction::CreateFile { path, contents } => self.create_file(path, contents),
            ToolAction::DeleteFile { path } => self.delete_file(path),
            ToolAction::RunFile { path } => self.run_file(path),
            ToolAction::CopyTemplate { source, dest } => self.copy_template(source, dest),
            ToolAction::ValidateOutput {
                subject,
                instructions,
            } => self.validate("validate_output", subject, instructions),
            ToolAction::ValidateCodeChanges {
                subject,
                instructions,
            } => self.validate("validate_code_changes", subject, instructions),
            ToolAction::ValidateCommandOutput {
                subject,
                instructions,
            } => self.validate("validate_command_output", subject, instructions),
            ToolAction::ValidateFileExists { path } => Ok(self.validate_file_exists(path)),
            ToolAction::AskInformation { prompt } => {
                let answer = self.human.ask_information(prompt)?;
                Ok(ToolResult::success(answer))
            }
            ToolAction::AskIntervention { explanation } => {
                let report = self.human.ask_intervention(explanation)?;
                Ok(ToolResult::success(format!(
                    "operator intervened: {report}"
                )))
            }
            ToolAction::LookupDocumentation { query } => {
                let answer = self.docs.lookup(query)?;
                Ok(ToolResult::success(answer))
            }
            ToolAction::RollbackCommit => {
                let sha = self.git.revert_head()?;
                Ok(ToolResult::success(format!("reverted commit {sha}")))
            }
        }
    }

    fn run_command(&self, command: &str) -> Result<ToolResult> {
        let transcript = self.runner.run(&CommandRequest {
            command: command.to_string(),
            workdir: None,
            timeout: self.command_timeout,
        })?;
        Ok(transcript_result(command, &transcript, self.command_timeout))
    }

    fn run_file(&self, path: &str) -> Result<ToolResult> {
        let resolved = self.resolve(path);
        if !resolved.is_file() {
            return Ok(ToolResult::error(format!(
                "file to run does not exist: {}",
                resolved.display()
            )));
        }
        // Run through the shell so scripts work without an execute bit.
        let command = format!("sh '{}'", resolved.display());
        let transcript = self.runner.run(&CommandRequest {
            command,
            workdir: None,
            timeout: self.command_timeout,
        })?;
        Ok(transcript_result(path, &transcript, self.command_timeout))
    }

    fn create_file(&self, path: &str, contents: &str) -> Result<ToolResult> {
        let resolved = self.resolve(path);
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create parent dirs for {}", resolved.display()))?;
        }
        fs::write(&resolved, contents)
            .with_context(|| format!("write {}", resolved.display()))?;
        debug!(path = %resolved.display(), bytes = contents.len(), "created file");
        Ok(ToolResult::success(format!(
            "wrote {} ({} bytes)",
            resolved.display(),
            contents.len()
        )))
    }

    fn delete_file(&self, path: &str) -> Result<ToolResult> {
        let resolved = self.resolve(path);
        if !resolved.exists() {
            return Ok(ToolResult::error(format!(
                "cannot delete, file does not exist: {}",
                resolved.display()
            )));
        }
        fs::remove_file(&resolved).with_context(|| format!("delete {}", resolved.display()))?;
        Ok(ToolResult::success(format!(
            "deleted {}",
            resolved.display()
        )))
    }

    fn copy_template(&self, source: &str, dest: &str) -> Result<ToolResult> {
        let source = self.resolve(source);
        let dest = self.resolve(dest);
        if !source.is_file() {
            return Ok(ToolResult::error(format!(
                "template source does not exist: {}",
                source.display()
            )));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create parent dirs for {}", dest.display()))?;
        }
        fs::copy(&source, &dest)
            .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
        Ok(ToolResult::success(format!(
            "copied {} to {}",
            source.display(),
            dest.display()
        )))
    }

    fn validate(&self, kind: &str, subject: &str, instructions: &str) -> Result<ToolResult> {
        let verdict = self.oracle.validate(&ValidationRequest {
            kind: kind.to_string(),
            subject: subject.to_string(),
            instructions: instructions.to_string(),
        })?;
        if verdict.passed {
            Ok(ToolResult::success(if verdict.notes.is_empty() {
                "validation passed".to_string()
            } else {
                verdict.notes
            }))
        } else {
            Ok(ToolResult::error(if verdict.notes.is_empty() {
                "validation failed".to_string()
            } else {
                format!("validation failed: {}", verdict.notes)
            }))
        }
    }

    fn validate_file_exists(&self, path: &str) -> ToolResult {
        let resolved = self.resolve(path);
        if resolved.exists() {
            ToolResult::success(format!("{} exists", resolved.display()))
        } else {
            ToolResult::error(format!("{} does not exist", resolved.display()))
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }
}

fn transcript_result(
    command: &str,
    transcript: &crate::io::interactive::CommandTranscript,
    timeout: std::time::Duration,
) -> ToolResult {
    if transcript.timed_out {
        return ToolResult::error_with_output(
            format!(
                "command '{command}' killed after {}s of inactivity",
                timeout.as_secs()
            ),
            transcript.transcript.clone(),
        );
    }
    match transcript.exit_code {
        Some(0) => ToolResult::success(transcript.transcript.clone()),
        Some(code) => ToolResult::error_with_output(
            format!("command '{command}' exited with status {code}"),
            transcript.transcript.clone(),
        ),
        None => ToolResult::error_with_output(
            format!("command '{command}' ended without an exit status"),
            transcript.transcript.clone(),
        ),
    }
}
