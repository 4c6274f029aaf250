//! Shared deterministic types for conductor core logic.
//!
//! These types define stable contracts between the engine, the dispatcher and
//! the oracle boundary. They must not depend on external state or I/O.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Outcome classification carried by every tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// Uniform result returned by every tool palette capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub status: ToolStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            output: Some(output.into()),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: None,
            error: Some(message.into()),
        }
    }

    /// Error result that still carries partial output (e.g. a timed-out
    /// command's transcript).
    pub fn error_with_output(message: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: Some(output.into()),
            error: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ToolStatus::Success
    }
}

/// Closed tag set for oracle decisions.
///
/// Every tool palette capability has a tag, plus the two terminal markers
/// `end` and `none`. An unrecognized tag deserializes to [`DecisionKind::Unknown`]
/// so a typo'd tag surfaces as an explicit dispatch error instead of a silent
/// fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionKind {
    ExecuteCommand,
    ModifyCode,
    CreateFile,
    DeleteFile,
    RunFile,
    CopyTemplate,
    ValidateOutput,
    ValidateCodeChanges,
    ValidateFileExists,
    ValidateCommandOutput,
    AskHumanForInformation,
    AskHumanForIntervention,
    LookupDocumentation,
    RollbackCommit,
    End,
    None,
    Unknown(String),
}

impl DecisionKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "execute_command" => Self::ExecuteCommand,
            "modify_code" => Self::ModifyCode,
            "create_file" => Self::CreateFile,
            "delete_file" => Self::DeleteFile,
            "run_file" => Self::RunFile,
            "copy_template" => Self::CopyTemplate,
            "validate_output" => Self::ValidateOutput,
            "validate_code_changes" => Self::ValidateCodeChanges,
            "validate_file_exists" => Self::ValidateFileExists,
            "validate_command_output" => Self::ValidateCommandOutput,
            "ask_human_for_information" => Self::AskHumanForInformation,
            "ask_human_for_intervention" => Self::AskHumanForIntervention,
            "lookup_documentation" => Self::LookupDocumentation,
            "rollback_commit" => Self::RollbackCommit,
            "end" => Self::End,
            "none" => Self::None,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            Self::ExecuteCommand => "execute_command",
            Self::ModifyCode => "modify_code",
            Self::CreateFile => "create_file",
            Self::DeleteFile => "delete_file",
            Self::RunFile => "run_file",
            Self::CopyTemplate => "copy_template",
            Self::ValidateOutput => "validate_output",
            Self::ValidateCodeChanges => "validate_code_changes",
            Self::ValidateFileExists => "validate_file_exists",
            Self::ValidateCommandOutput => "validate_command_output",
            Self::AskHumanForInformation => "ask_human_for_information",
            Self::AskHumanForIntervention => "ask_human_for_intervention",
            Self::LookupDocumentation => "lookup_documentation",
            Self::RollbackCommit => "rollback_commit",
            Self::End => "end",
            Self::None => "none",
            Self::Unknown(tag) => tag,
        }
    }

    /// Markers that finalize the current step instead of dispatching a tool.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::None)
    }
}

impl Serialize for DecisionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for DecisionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.trim().is_empty() {
            return Err(D::Error::custom("decision type tag is empty"));
        }
        Ok(Self::from_tag(&tag))
    }
}

/// One structured oracle answer for "what should happen next".
///
/// Produced once per oracle consultation; never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "type")]
    pub kind: DecisionKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reasoning: String,
}

/// Structured step summary produced by the oracle (or assembled locally when
/// the summarizer call fails).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub summary: String,
    #[serde(default)]
    pub key_learnings: Vec<String>,
    /// Notes the oracle considers relevant for later steps.
    #[serde(default)]
    pub forward_notes: Vec<String>,
}

/// Why a step was finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCompletion {
    /// Oracle declared the step done (`end`).
    Completed,
    /// Oracle declared nothing needed doing (`none`).
    NoActionNeeded,
}

/// Append-only ledger entry created exactly once when a step finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedStepRecord {
    pub description: String,
    pub status: StepCompletion,
    pub summary: StepSummary,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Verdict returned by oracle-backed validation capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub passed: bool,
    #[serde(default)]
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_kind_round_trips_all_known_tags() {
        let tags = [
            "execute_command",
            "modify_code",
            "create_file",
            "delete_file",
            "run_file",
            "copy_template",
            "validate_output",
            "validate_code_changes",
            "validate_file_exists",
            "validate_command_output",
            "ask_human_for_information",
            "ask_human_for_intervention",
            "lookup_documentation",
            "rollback_commit",
            "end",
            "none",
        ];
        for tag in tags {
            let kind = DecisionKind::from_tag(tag);
            assert!(!matches!(kind, DecisionKind::Unknown(_)), "tag {tag}");
            assert_eq!(kind.as_tag(), tag);
        }
    }

    #[test]
    fn unknown_tag_is_preserved_not_swallowed() {
        let kind = DecisionKind::from_tag("excute_command");
        assert_eq!(kind, DecisionKind::Unknown("excute_command".to_string()));
        assert_eq!(kind.as_tag(), "excute_command");
        assert!(!kind.is_terminal());
    }

    #[test]
    fn decision_deserializes_with_missing_optional_fields() {
        let decision: Decision =
            serde_json::from_str(r#"{"type": "end", "reasoning": "all checks passed"}"#)
                .expect("parse");
        assert_eq!(decision.kind, DecisionKind::End);
        assert!(decision.kind.is_terminal());
        assert_eq!(decision.content, "");
        assert_eq!(decision.reasoning, "all checks passed");
    }

    #[test]
    fn decision_rejects_empty_type_tag() {
        let err = serde_json::from_str::<Decision>(r#"{"type": " "}"#).unwrap_err();
        assert!(err.to_string().contains("decision type tag is empty"));
    }

    #[test]
    fn tool_result_constructors_set_status() {
        assert!(ToolResult::success("ok").is_success());
        let err = ToolResult::error_with_output("timed out", "partial");
        assert_eq!(err.status, ToolStatus::Error);
        assert_eq!(err.output.as_deref(), Some("partial"));
        assert_eq!(err.error.as_deref(), Some("timed out"));
    }
}
