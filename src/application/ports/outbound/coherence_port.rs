//! Coherence store port - Cross-chapter context persistence collaborator
//!
//! The store is a single process-wide resource: written only by the
//! pipeline's commit phase, read by context preparation of later chapters.
//! Callers must never run two chapter pipelines against the same store
//! concurrently - single-writer/read-mostly is an API precondition, not
//! something the port enforces.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::entities::ChapterRecord;
use crate::domain::value_objects::{ChapterPlan, CharacterProfile};

/// Structure-facing slice of a chapter context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureContext {
    /// Role this chapter plays in the story (opening, rising, climactic...).
    pub chapter_role: String,
    /// Requested tempo: fast, moderate, slow.
    pub tempo: String,
    /// Tension target on a 1-10 scale.
    pub tension_level: u8,
    pub plot_threads_to_advance: Vec<String>,
}

/// Last known state of a character, as the store tracks it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterState {
    pub location: String,
    pub primary_emotion: String,
}

/// Character-facing slice of a chapter context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterContext {
    pub active_characters: Vec<String>,
    pub character_states: BTreeMap<String, CharacterState>,
}

/// The primary location a scene plays out in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationContext {
    pub name: String,
    pub description: String,
    /// How safe the location reads: safe, neutral, hostile.
    pub security_level: String,
}

/// Scene-facing slice of a chapter context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneContext {
    pub primary_location: LocationContext,
    pub mood: String,
    pub tension: String,
    pub sensory_focus: Vec<String>,
}

/// Constraints every specialist must respect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoherenceConstraints {
    pub established_facts: Vec<String>,
    pub relationships: Vec<String>,
    pub world_rules: Vec<String>,
    pub plot_threads: Vec<String>,
}

/// Everything context preparation hands to the generation phases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterContext {
    pub structure: StructureContext,
    pub character: CharacterContext,
    pub scene: SceneContext,
    pub constraints: CoherenceConstraints,
}

/// Severity scale shared by repetition findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepetitionSeverity {
    Low,
    Medium,
    High,
}

/// One repeated phrase found in chapter text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepetitionIssue {
    pub phrase: String,
    pub count: usize,
    pub severity: RepetitionSeverity,
    /// Table key for substitutions: metaphors, sensory, emotional.
    pub category: String,
}

/// Repetition scan over a chapter, relative to earlier chapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepetitionReport {
    pub total_repetitions: usize,
    pub severity: RepetitionSeverity,
    pub issues: Vec<RepetitionIssue>,
}

/// Balance problems the store flags across recent chapters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceIssueKind {
    DescriptionOverload,
    InternalOverload,
    ConsecutiveDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceIssue {
    pub kind: BalanceIssueKind,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BalanceReport {
    pub issues: Vec<BalanceIssue>,
}

/// Bounded corrective action suggested by a content-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LimitAction {
    CondenseInternal,
    AddMicroAction,
}

/// Result of checking one agent's output against content limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub suggested_action: Option<LimitAction>,
}

impl LimitCheck {
    pub fn ok() -> Self {
        Self {
            allowed: true,
            reason: None,
            suggested_action: None,
        }
    }
}

/// Tone guidance the scene stage adapts to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToneGuidance {
    pub current_tone: String,
    /// Requested description length: short, medium, long.
    pub description_length: String,
    pub sentence_style: String,
}

/// Failure inside the coherence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum CoherenceError {
    #[error("coherence store error: {0}")]
    Storage(String),
}

/// Port for the cross-chapter coherence store
#[async_trait]
pub trait CoherenceStorePort: Send + Sync {
    /// Seed the store from the story outline before chapter 1.
    async fn initialize_from_outline(
        &self,
        outline: &str,
        characters: &[CharacterProfile],
        chapter_count: u32,
    ) -> Result<(), CoherenceError>;

    /// Derive the per-chapter generation context.
    async fn prepare_chapter_context(
        &self,
        chapter_number: u32,
        plan: &ChapterPlan,
    ) -> Result<ChapterContext, CoherenceError>;

    /// Commit a finalized chapter. The only write the pipeline performs.
    async fn update_from_generated_chapter(
        &self,
        chapter: &ChapterRecord,
        chapter_number: u32,
    ) -> Result<(), CoherenceError>;

    /// Scan chapter text for phrases overused across the story so far.
    async fn check_for_repetition(
        &self,
        text: &str,
        chapter_number: u32,
    ) -> Result<RepetitionReport, CoherenceError>;

    /// Flag balance problems across recent chapters.
    async fn validate_chapter_balance(&self) -> Result<BalanceReport, CoherenceError>;

    /// Check one agent's output against per-kind content limits.
    async fn check_content_limits(
        &self,
        kind: &str,
        text: &str,
    ) -> Result<LimitCheck, CoherenceError>;

    /// Tone guidance for the scene stage, derived from recent chapters.
    async fn tone_guidance_for_scene(&self) -> Result<ToneGuidance, CoherenceError>;
}
