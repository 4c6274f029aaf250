//! Knowledge trace: the append-only record of tool invocations.
//!
//! Entries are stored arena-style, indexed by step, so summarization and
//! replay operate over an immutable prefix. The engine only ever appends to
//! the segment for the step currently in progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::ToolResult;

/// Engine-side context captured with each entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryContext {
    pub step_index: usize,
    pub step_description: String,
    /// Attempt number within the step (1-indexed).
    pub attempt: u32,
    /// The oracle's stated reasoning for the dispatched decision.
    pub reasoning: String,
}

/// One record per tool dispatch, appended exactly once whether the capability
/// succeeded, returned an error result, or raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub timestamp: DateTime<Utc>,
    /// The decision tag that selected the capability.
    pub action_type: String,
    /// Serialized tool inputs as shaped by the dispatcher.
    pub action: serde_json::Value,
    pub result: ToolResult,
    pub context: EntryContext,
}

/// Per-step segments of knowledge entries, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeTrace {
    segments: Vec<Vec<KnowledgeEntry>>,
}

impl KnowledgeTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the segment for `step_index`, creating empty segments up to and
    /// including it. Idempotent for the current step.
    pub fn begin_step(&mut self, step_index: usize) {
        while self.segments.len() <= step_index {
            self.segments.push(Vec::new());
        }
    }

    pub fn append(&mut self, entry: KnowledgeEntry) {
        let step = entry.context.step_index;
        self.begin_step(step);
        self.segments[step].push(entry);
    }

    /// Entries accumulated for the step currently in progress.
    pub fn for_step(&self, step_index: usize) -> &[KnowledgeEntry] {
        self.segments
            .get(step_index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Render a step's entries as text for oracle context. Returns `None`
    /// when nothing has been dispatched yet.
    pub fn render_step(&self, step_index: usize) -> Option<String> {
        let entries = self.for_step(step_index);
        if entries.is_empty() {
            return None;
        }
        let mut buf = String::new();
        for (i, entry) in entries.iter().enumerate() {
            buf.push_str(&format!(
                "{}. [{}] attempt {} -> {}\n",
                i + 1,
                entry.action_type,
                entry.context.attempt,
                match entry.result.status {
                    crate::core::types::ToolStatus::Success => "success",
                    crate::core::types::ToolStatus::Error => "error",
                },
            ));
            if let Some(output) = entry.result.output.as_deref().filter(|s| !s.is_empty()) {
                buf.push_str(&indent("output: ", output));
            }
            if let Some(error) = entry.result.error.as_deref().filter(|s| !s.is_empty()) {
                buf.push_str(&indent("error: ", error));
            }
        }
        Some(buf)
    }

    /// Most recent successful output for a given action tag within a step.
    /// Used by the dispatcher to shape validation inputs.
    pub fn latest_success_output(&self, step_index: usize, action_type: &str) -> Option<&str> {
        self.for_step(step_index)
            .iter()
            .rev()
            .filter(|entry| entry.action_type == action_type && entry.result.is_success())
            .find_map(|entry| entry.result.output.as_deref())
    }
}

fn indent(label: &str, body: &str) -> String {
    let mut buf = String::new();
    buf.push_str("   ");
    buf.push_str(label);
    let mut lines = body.trim_end().lines();
    if let Some(first) = lines.next() {
        buf.push_str(first);
        buf.push('\n');
    }
    for line in lines {
        buf.push_str("   ");
        buf.push_str(line);
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolResult;

    fn entry(step: usize, attempt: u32, action_type: &str, result: ToolResult) -> KnowledgeEntry {
        KnowledgeEntry {
            timestamp: Utc::now(),
            action_type: action_type.to_string(),
            action: serde_json::json!({ "tool": action_type }),
            result,
            context: EntryContext {
                step_index: step,
                step_description: "step".to_string(),
                attempt,
                reasoning: "because".to_string(),
            },
        }
    }

    #[test]
    fn entries_stay_ordered_within_their_step() {
        let mut trace = KnowledgeTrace::new();
        trace.append(entry(0, 1, "execute_command", ToolResult::success("a")));
        trace.append(entry(0, 2, "modify_code", ToolResult::error("boom")));

        let entries = trace.for_step(0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].context.attempt, 1);
        assert_eq!(entries[1].context.attempt, 2);
        assert!(trace.for_step(1).is_empty());
    }

    #[test]
    fn begin_step_leaves_new_segment_empty() {
        let mut trace = KnowledgeTrace::new();
        trace.append(entry(0, 1, "execute_command", ToolResult::success("a")));
        trace.begin_step(1);
        assert!(trace.for_step(1).is_empty());
        assert_eq!(trace.for_step(0).len(), 1);
    }

    #[test]
    fn render_includes_outputs_and_errors() {
        let mut trace = KnowledgeTrace::new();
        trace.append(entry(0, 1, "execute_command", ToolResult::success("hello")));
        trace.append(entry(
            0,
            2,
            "execute_command",
            ToolResult::error_with_output("timed out", "partial"),
        ));

        let text = trace.render_step(0).expect("rendered");
        assert!(text.contains("1. [execute_command] attempt 1 -> success"));
        assert!(text.contains("output: hello"));
        assert!(text.contains("error: timed out"));
        assert!(text.contains("output: partial"));
        assert!(trace.render_step(1).is_none());
    }

    #[test]
    fn latest_success_output_skips_errors_and_other_tags() {
        let mut trace = KnowledgeTrace::new();
        trace.append(entry(0, 1, "modify_code", ToolResult::success("first diff")));
        trace.append(entry(0, 2, "modify_code", ToolResult::success("second diff")));
        trace.append(entry(0, 3, "modify_code", ToolResult::error("failed")));
        trace.append(entry(0, 4, "execute_command", ToolResult::success("noise")));

        assert_eq!(
            trace.latest_success_output(0, "modify_code"),
            Some("second diff")
        );
        assert_eq!(trace.latest_success_output(1, "modify_code"), None);
    }
}
