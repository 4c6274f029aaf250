//! Input shaping: turn an oracle [`Decision`] into a concrete [`ToolAction`].
//!
//! This is the static mapping from decision tags to tool palette capabilities,
//! plus the per-tag rule for assembling capability inputs from the decision's
//! fields and the current step's knowledge trace. Pure logic, no I/O.

use serde::Serialize;
use thiserror::Error;

use crate::core::knowledge::KnowledgeTrace;
use crate::core::types::{Decision, DecisionKind};

/// A fully shaped invocation of one tool palette capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum ToolAction {
    ExecuteCommand { command: String },
    ModifyCode { content: String, description: String },
    CreateFile { path: String, contents: String },
    DeleteFile { path: String },
    RunFile { path: String },
    CopyTemplate { source: String, dest: String },
    ValidateOutput { subject: String, instructions: String },
    ValidateCodeChanges { subject: String, instructions: String },
    ValidateFileExists { path: String },
    ValidateCommandOutput { subject: String, instructions: String },
    AskInformation { prompt: String },
    AskIntervention { explanation: String },
    LookupDocumentation { query: String },
    RollbackCommit,
}

/// Why a decision could not be shaped into a tool action.
///
/// Shape errors are never fatal: the engine records them as error knowledge
/// entries so the oracle sees its mistake on the next consultation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("unknown decision type '{0}'")]
    UnknownKind(String),
    #[error("decision type '{kind}' requires a non-empty '{field}' field")]
    MissingField { kind: String, field: String },
    #[error("copy_template content must be 'SOURCE -> DEST', got '{0}'")]
    MalformedTemplateSpec(String),
    #[error("terminal marker '{0}' does not dispatch a tool")]
    TerminalMarker(String),
}

/// Shape `decision` into a tool action, consulting the current step's trace
/// where a capability's input is defined in terms of earlier results.
pub fn shape(
    decision: &Decision,
    trace: &KnowledgeTrace,
    step_index: usize,
) -> Result<ToolAction, ShapeError> {
    let content = decision.content.trim();
    let description = decision.description.trim();

    match &decision.kind {
        DecisionKind::ExecuteCommand => Ok(ToolAction::ExecuteCommand {
            command: require(&decision.kind, "content", content)?.to_string(),
        }),
        DecisionKind::ModifyCode => Ok(ToolAction::ModifyCode {
            content: require(&decision.kind, "content", content)?.to_string(),
            description: description.to_string(),
        }),
        DecisionKind::CreateFile => {
            let body = require(&decision.kind, "content", content)?;
            // First line names the path, the remainder is the file body.
            let (path, contents) = match body.split_once('\n') {
                Some((path, rest)) => (path.trim(), rest),
                None => (body, ""),
            };
            Ok(ToolAction::CreateFile {
                path: require(&decision.kind, "content", path)?.to_string(),
                contents: contents.to_string(),
            })
        }
        DecisionKind::DeleteFile => Ok(ToolAction::DeleteFile {
            path: require(&decision.kind, "content", content)?.to_string(),
        }),
        DecisionKind::RunFile => Ok(ToolAction::RunFile {
            path: require(&decision.kind, "content", content)?.to_string(),
        }),
        DecisionKind::CopyTemplate => {
            let spec = require(&decision.kind, "content", content)?;
            let (source, dest) = spec
                .split_once("->")
                .ok_or_else(|| ShapeError::MalformedTemplateSpec(spec.to_string()))?;
            let (source, dest) = (source.trim(), dest.trim());
            if source.is_empty() || dest.is_empty() {
                return Err(ShapeError::MalformedTemplateSpec(spec.to_string()));
            }
            Ok(ToolAction::CopyTemplate {
                source: source.to_string(),
                dest: dest.to_string(),
            })
        }
        DecisionKind::ValidateOutput => Ok(ToolAction::ValidateOutput {
            subject: subject_or_content(trace, step_index, "execute_command", content),
            instructions: instructions(description, content),
        }),
        DecisionKind::ValidateCodeChanges => Ok(ToolAction::ValidateCodeChanges {
            // Most recent successful modify_code output, falling back to the
            // decision's own content.
            subject: subject_or_content(trace, step_index, "modify_code", content),
            instructions: instructions(description, content),
        }),
        DecisionKind::ValidateFileExists => Ok(ToolAction::ValidateFileExists {
            path: require(&decision.kind, "content", content)?.to_string(),
        }),
        DecisionKind::ValidateCommandOutput => Ok(ToolAction::ValidateCommandOutput {
            subject: subject_or_content(trace, step_index, "execute_command", content),
            instructions: instructions(description, content),
        }),
        DecisionKind::AskHumanForInformation => Ok(ToolAction::AskInformation {
            prompt: first_non_empty(&decision.kind, "description", description, content)?,
        }),
        DecisionKind::AskHumanForIntervention => Ok(ToolAction::AskIntervention {
            explanation: first_non_empty(&decision.kind, "description", description, content)?,
        }),
        DecisionKind::LookupDocumentation => Ok(ToolAction::LookupDocumentation {
            query: first_non_empty(&decision.kind, "content", content, description)?,
        }),
        DecisionKind::RollbackCommit => Ok(ToolAction::RollbackCommit),
        DecisionKind::End | DecisionKind::None => {
            Err(ShapeError::TerminalMarker(decision.kind.as_tag().to_string()))
        }
        DecisionKind::Unknown(tag) => Err(ShapeError::UnknownKind(tag.clone())),
    }
}

fn require<'a>(kind: &DecisionKind, field: &str, value: &'a str) -> Result<&'a str, ShapeError> {
    if value.is_empty() {
        return Err(ShapeError::MissingField {
            kind: kind.as_tag().to_string(),
            field: field.to_string(),
        });
    }
    Ok(value)
}

fn first_non_empty(
    kind: &DecisionKind,
    field: &str,
    preferred: &str,
    fallback: &str,
) -> Result<String, ShapeError> {
    if !preferred.is_empty() {
        return Ok(preferred.to_string());
    }
    if !fallback.is_empty() {
        return Ok(fallback.to_string());
    }
    Err(ShapeError::MissingField {
        kind: kind.as_tag().to_string(),
        field: field.to_string(),
    })
}

fn subject_or_content(
    trace: &KnowledgeTrace,
    step_index: usize,
    action_type: &str,
    content: &str,
) -> String {
    trace
        .latest_success_output(step_index, action_type)
        .map(str::to_string)
        .unwrap_or_else(|| content.to_string())
}

fn instructions(description: &str, content: &str) -> String {
    if description.is_empty() {
        content.to_string()
    } else {
        description.to_string()
    }
}
