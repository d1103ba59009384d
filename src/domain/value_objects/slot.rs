//! Slot markers - Named insertion points in a chapter skeleton
//!
//! The wire convention shared by the structure, specialist, and synthesis
//! stages is a plain-text marker embedded in prose: `[CATEGORY_IDENTIFIER]`,
//! where the category prefix decides which specialist owns the slot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Content filled in for slots, keyed by slot id.
///
/// A `BTreeMap` so that every walk over a slot map is in slot-id order,
/// independent of insertion order.
pub type SlotContentMap = BTreeMap<String, String>;

/// The five content categories a slot can belong to.
///
/// Derived from the marker prefix before the first underscore, e.g.
/// `DIALOGUE_BARKEEP_GREETING` is a [`SlotCategory::Dialogue`] slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotCategory {
    Dialogue,
    Action,
    Internal,
    Description,
    Transition,
}

impl SlotCategory {
    /// All categories, in marker-prefix order.
    pub const ALL: [SlotCategory; 5] = [
        SlotCategory::Dialogue,
        SlotCategory::Action,
        SlotCategory::Internal,
        SlotCategory::Description,
        SlotCategory::Transition,
    ];

    /// The uppercase marker prefix for this category.
    pub fn prefix(&self) -> &'static str {
        match self {
            SlotCategory::Dialogue => "DIALOGUE",
            SlotCategory::Action => "ACTION",
            SlotCategory::Internal => "INTERNAL",
            SlotCategory::Description => "DESCRIPTION",
            SlotCategory::Transition => "TRANSITION",
        }
    }

    /// Parse a category from the prefix of a slot id.
    ///
    /// Accepts both a bare category (`DIALOGUE`) and a prefixed id
    /// (`DIALOGUE_CONFRONTATION`).
    pub fn from_slot_id(id: &str) -> Option<SlotCategory> {
        let prefix = id.split('_').next().unwrap_or(id);
        SlotCategory::ALL.into_iter().find(|c| c.prefix() == prefix)
    }
}

/// A named insertion point awaiting specialist content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Unique id within one chapter's skeleton, e.g. `DIALOGUE_REVELATION`.
    pub id: String,
    /// Category derived from the id prefix.
    pub category: SlotCategory,
}

impl Slot {
    /// Build a slot from its id, deriving the category from the prefix.
    pub fn parse(id: &str) -> Option<Slot> {
        SlotCategory::from_slot_id(id).map(|category| Slot {
            id: id.to_string(),
            category,
        })
    }

    /// The literal marker as it appears in skeleton prose.
    pub fn marker(&self) -> String {
        format!("[{}]", self.id)
    }
}

/// Which generation stage produced a piece of slot content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentSource {
    Structure,
    Character,
    Scene,
}

impl AgentSource {
    /// Fixed merge priority: structure=3, character=2, scene=1.
    pub fn priority(&self) -> u8 {
        match self {
            AgentSource::Structure => 3,
            AgentSource::Character => 2,
            AgentSource::Scene => 1,
        }
    }

    /// Whether this stage owns slots of the given category.
    ///
    /// Character owns dialogue and internal monologue; Scene owns description
    /// and action; transitions stay with the structure skeleton.
    pub fn owns(&self, category: SlotCategory) -> bool {
        match self {
            AgentSource::Structure => matches!(category, SlotCategory::Transition),
            AgentSource::Character => {
                matches!(category, SlotCategory::Dialogue | SlotCategory::Internal)
            }
            AgentSource::Scene => {
                matches!(category, SlotCategory::Description | SlotCategory::Action)
            }
        }
    }

    /// The owning stage for a category.
    pub fn owner_of(category: SlotCategory) -> AgentSource {
        match category {
            SlotCategory::Dialogue | SlotCategory::Internal => AgentSource::Character,
            SlotCategory::Description | SlotCategory::Action => AgentSource::Scene,
            SlotCategory::Transition => AgentSource::Structure,
        }
    }
}

/// Normalized merge record built by the synthesis stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMapping {
    pub slot_id: String,
    pub content: String,
    pub source: AgentSource,
    pub priority: u8,
}

impl SlotMapping {
    pub fn new(slot_id: impl Into<String>, content: impl Into<String>, source: AgentSource) -> Self {
        Self {
            slot_id: slot_id.into(),
            content: content.into(),
            source,
            priority: source.priority(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_slot_id() {
        assert_eq!(
            SlotCategory::from_slot_id("DIALOGUE_BARKEEP_GREETING"),
            Some(SlotCategory::Dialogue)
        );
        assert_eq!(
            SlotCategory::from_slot_id("TRANSITION_END"),
            Some(SlotCategory::Transition)
        );
        assert_eq!(SlotCategory::from_slot_id("NARRATOR_VOICE"), None);
    }

    #[test]
    fn test_slot_parse_and_marker() {
        let slot = Slot::parse("DESCRIPTION_TAVERN_ATMOSPHERE").unwrap();
        assert_eq!(slot.category, SlotCategory::Description);
        assert_eq!(slot.marker(), "[DESCRIPTION_TAVERN_ATMOSPHERE]");
        assert!(Slot::parse("UNKNOWN_THING").is_none());
    }

    #[test]
    fn test_source_priorities_are_fixed() {
        assert_eq!(AgentSource::Structure.priority(), 3);
        assert_eq!(AgentSource::Character.priority(), 2);
        assert_eq!(AgentSource::Scene.priority(), 1);
    }

    #[test]
    fn test_ownership() {
        assert!(AgentSource::Character.owns(SlotCategory::Dialogue));
        assert!(AgentSource::Character.owns(SlotCategory::Internal));
        assert!(AgentSource::Scene.owns(SlotCategory::Description));
        assert!(AgentSource::Scene.owns(SlotCategory::Action));
        assert!(!AgentSource::Scene.owns(SlotCategory::Dialogue));
        assert_eq!(
            AgentSource::owner_of(SlotCategory::Transition),
            AgentSource::Structure
        );
    }
}
