//! Editing decisions - Strategy classification for the refinement loop

use serde::{Deserialize, Serialize};

/// Revision strategy chosen by the editing loop's decision step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EditingStrategy {
    /// No changes needed, the chapter is strong as-is.
    Skip,
    /// Minimal surgical fixes for specific flagged issues.
    TargetedEdit,
    /// Full rewrite bound to the original plan constraints.
    Regenerate,
    /// Light stylistic pass.
    Polish,
}

/// Urgency of the chosen strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionPriority {
    High,
    Medium,
    Low,
}

/// The decision step's full output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditingDecision {
    pub strategy: EditingStrategy,
    pub reasoning: String,
    pub priority: DecisionPriority,
    /// Rough expected change volume, e.g. "10-20%".
    #[serde(rename = "estimatedChanges")]
    pub estimated_changes: String,
    /// 0-100. Below 60 means the decision is uncertain.
    pub confidence: u8,
}

/// Kind of editing-loop log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditLogKind {
    Decision,
    Execution,
    Evaluation,
    Iteration,
    Warning,
    Success,
    Diff,
}

/// One entry in the editing loop's audit trail. Diff entries carry the
/// before/after text so callers can render what a strategy changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditLogEntry {
    pub chapter_number: u32,
    pub kind: EditLogKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<EditingStrategy>,
}

impl EditLogEntry {
    pub fn new(chapter_number: u32, kind: EditLogKind, message: impl Into<String>) -> Self {
        Self {
            chapter_number,
            kind,
            message: message.into(),
            before_text: None,
            after_text: None,
            strategy: None,
        }
    }

    /// A diff entry recording a strategy's before/after text.
    pub fn diff(
        chapter_number: u32,
        strategy: EditingStrategy,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            chapter_number,
            kind: EditLogKind::Diff,
            message: format!("text changes applied via {:?}", strategy),
            before_text: Some(before.into()),
            after_text: Some(after.into()),
            strategy: Some(strategy),
        }
    }
}
