//! Generation DTOs - Request and result envelopes for one chapter run

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::ChapterRecord;
use crate::domain::value_objects::{
    ChapterPlan, CharacterProfile, ConflictRecord, EditingStrategy,
};

/// Input for one chapter-generation invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterGenerationRequest {
    pub chapter_number: u32,
    pub plan: ChapterPlan,
    #[serde(default)]
    pub characters: Vec<CharacterProfile>,
    /// Tail of the previous chapter, for continuity in the skeleton.
    #[serde(default)]
    pub previous_chapter_end: Option<String>,
    pub story_outline: String,
    /// Target chapter length in characters.
    pub target_length: usize,
    #[serde(default)]
    pub genre: Option<String>,
}

/// Tunables for a pipeline run. An explicit value threaded into the
/// coordinator so concurrent or test-isolated runs cannot observe
/// cross-talk through globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Route the merged chapter through the editing loop in polish mode.
    pub enable_light_polish: bool,
    /// Whole-pipeline retries after a phase failure. Bounded; default 1.
    pub max_pipeline_retries: u32,
    /// Editing loop stops once the evaluated quality reaches this score.
    pub quality_threshold: u8,
    /// Total chapters in the story, used to seed the coherence store.
    pub chapter_count: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enable_light_polish: true,
            max_pipeline_retries: 1,
            quality_threshold: 70,
            chapter_count: 10,
        }
    }
}

/// Which agent a timing/confidence sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Structure,
    Character,
    Scene,
    Synthesis,
}

/// Timing and self-reported confidence for one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    pub kind: AgentKind,
    pub elapsed_ms: u64,
    /// 0-100 self-assessment of output reliability.
    pub confidence: u8,
    pub notes: Vec<String>,
}

/// Summary payload a successful phase reports, keyed by phase kind so
/// downstream consumers can pattern-match exhaustively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "kebab-case")]
pub enum PhaseOutput {
    Context {
        plot_threads: Vec<String>,
    },
    Specialists {
        slot_count: usize,
        character_slots: usize,
        scene_slots: usize,
    },
    Synthesis {
        conflicts: Vec<ConflictRecord>,
        hooks_added: Vec<String>,
        unresolved_slots: Vec<String>,
        confidence: u8,
    },
    Polish {
        strategy: EditingStrategy,
        quality_score: u8,
        changes_applied: Vec<String>,
    },
    Repetition {
        total_repetitions: usize,
        fixed: bool,
    },
    Commit {
        chapter_number: u32,
    },
}

/// Uniform envelope emitted by every coordinator phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PhaseOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PhaseResult {
    pub fn succeeded(
        name: impl Into<String>,
        duration_ms: u64,
        output: PhaseOutput,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            duration_ms,
            success: true,
            output: Some(output),
            errors: Vec::new(),
            warnings,
        }
    }

    pub fn failed(name: impl Into<String>, duration_ms: u64, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration_ms,
            success: false,
            output: None,
            errors: vec![error.into()],
            warnings: Vec::new(),
        }
    }
}

/// Aggregate quality scores derived from the phase trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub coherence: u8,
    pub integration: u8,
    pub polish: u8,
}

/// Per-agent timing entry in the result metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTiming {
    pub elapsed_ms: u64,
    pub confidence: u8,
}

/// Run-level metadata attached to every result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub run_id: Uuid,
    pub total_time_ms: u64,
    pub agent_timing: BTreeMap<AgentKind, AgentTiming>,
    pub quality: QualityMetrics,
}

/// Final output of one chapter-generation invocation.
///
/// A failed run still carries the partial phase trace and a placeholder
/// chapter body with a human-readable error - the pipeline never panics
/// past the coordinator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterGenerationResult {
    pub success: bool,
    pub chapter: ChapterRecord,
    pub phases: Vec<PhaseResult>,
    pub metadata: GenerationMetadata,
}
