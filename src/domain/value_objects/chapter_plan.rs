//! Chapter plans - Immutable per-chapter input from the upstream planner

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Plan for a single chapter, produced by an upstream planning stage.
///
/// Only `title` and `summary` are always present; the detailed planning
/// blocks are optional and default to empty when the planner did not
/// produce them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChapterPlan {
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub scene_breakdown: String,
    #[serde(default)]
    pub conflict_type: Option<String>,
    #[serde(default)]
    pub tension_level: Option<u8>,
    #[serde(default)]
    pub plot_advancement: Option<String>,
    #[serde(default)]
    pub emotional_tone: Option<String>,
    #[serde(default)]
    pub moral_dilemma: Option<String>,
    #[serde(default)]
    pub character_complexity: Option<String>,
    #[serde(default)]
    pub consequences_of_choices: Option<String>,
    #[serde(default)]
    pub character_development_focus: Option<String>,
    #[serde(default)]
    pub primary_location: Option<String>,
    #[serde(default)]
    pub target_word_count: Option<usize>,
    #[serde(default)]
    pub opening_hook: Option<String>,
    #[serde(default)]
    pub climax_moment: Option<String>,
    #[serde(default)]
    pub chapter_ending: Option<String>,
    #[serde(default)]
    pub detailed_scenes: Vec<PlannedScene>,
    #[serde(default)]
    pub chapter_events: Vec<PlannedEvent>,
    #[serde(default)]
    pub dialogue_beats: Vec<DialogueBeat>,
    #[serde(default)]
    pub character_arcs: Vec<CharacterArcPlan>,
}

/// One planned scene inside a chapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannedScene {
    pub scene_id: String,
    pub location: String,
    #[serde(default)]
    pub participants: Vec<String>,
    pub objective: String,
    pub conflict: String,
    pub outcome: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub mood: String,
    #[serde(default)]
    pub key_moments: Vec<String>,
}

/// A specific narrative event the chapter must contain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannedEvent {
    pub event_id: String,
    pub event_type: String,
    pub description: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub consequences: Vec<String>,
    #[serde(default)]
    pub emotional_impact: u8,
    #[serde(default)]
    pub plot_significance: String,
}

/// A planned dialogue moment with purpose and subtext.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DialogueBeat {
    pub purpose: String,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub subtext: String,
    #[serde(default)]
    pub revelations: Vec<String>,
    #[serde(default)]
    pub tensions: Vec<String>,
    #[serde(default)]
    pub emotional_shifts: Vec<String>,
}

/// A character's emotional journey through the chapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterArcPlan {
    pub character: String,
    pub start_state: String,
    pub end_state: String,
    #[serde(default)]
    pub growth: String,
    #[serde(default)]
    pub key_moments: Vec<String>,
    #[serde(default)]
    pub internal_conflicts: Vec<String>,
    #[serde(default)]
    pub relationships: String,
}

/// A character known to the story, as tracked across chapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub emotional_state: String,
    #[serde(default)]
    pub relationships: BTreeMap<String, String>,
}
