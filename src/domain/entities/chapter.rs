//! Chapter record - The finalized chapter pushed to the coherence store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The only entity that outlives a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub title: String,
    pub content: String,
    /// The plan the chapter was generated against, as formatted text.
    pub plan: String,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

impl ChapterRecord {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        plan: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            plan: plan.into(),
            summary: summary.into(),
            generated_at: Utc::now(),
        }
    }
}
