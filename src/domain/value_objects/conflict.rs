//! Conflict records - Cross-agent inconsistencies found during synthesis

use serde::{Deserialize, Serialize};

/// Kinds of cross-agent conflict the synthesis checkers can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Tone,
    Pacing,
    Content,
    PowerScaling,
    SystemLogic,
}

/// A detected conflict. Detection result only - the checkers never mutate
/// content; resolution is priority override and the record documents it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub kind: ConflictKind,
    pub description: String,
    pub resolution: String,
}

impl ConflictRecord {
    pub fn new(
        kind: ConflictKind,
        description: impl Into<String>,
        resolution: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            description: description.into(),
            resolution: resolution.into(),
        }
    }
}
