//! Structure framework - The prose skeleton with embedded slot markers
//!
//! Owned solely by the structure stage; read-only downstream. The derived
//! slot inventory is the only thing the specialist stages ever see.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::value_objects::{Slot, SlotCategory};

/// Matches `[UPPERCASE_TOKEN]` markers in skeleton prose.
pub static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([A-Z][A-Z0-9_]*)\]").expect("marker regex"));

/// Errors raised while validating a generated skeleton.
///
/// Any of these is fatal to the chapter: there is no fallback skeleton.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("skeleton contains no slot markers")]
    NoSlots,
    #[error("marker [{0}] does not match a known slot category")]
    UnknownCategory(String),
    #[error("duplicate slot id [{0}] in skeleton")]
    DuplicateSlot(String),
}

/// A validated prose skeleton plus its derived slot inventory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureFramework {
    prose: String,
    slots: Vec<Slot>,
}

impl StructureFramework {
    /// Validate generated prose and derive the slot inventory.
    ///
    /// Every bracket token must parse to one of the five known categories
    /// and identifiers must be unique within the chapter.
    pub fn parse(prose: impl Into<String>) -> Result<StructureFramework, FrameworkError> {
        let prose = prose.into();
        let mut slots: Vec<Slot> = Vec::new();

        for caps in MARKER_RE.captures_iter(&prose) {
            let id = &caps[1];
            let slot = Slot::parse(id).ok_or_else(|| FrameworkError::UnknownCategory(id.into()))?;
            if slots.iter().any(|s| s.id == slot.id) {
                return Err(FrameworkError::DuplicateSlot(slot.id));
            }
            slots.push(slot);
        }

        if slots.is_empty() {
            return Err(FrameworkError::NoSlots);
        }

        Ok(StructureFramework { prose, slots })
    }

    /// The full skeleton prose, markers included.
    pub fn prose(&self) -> &str {
        &self.prose
    }

    /// Every slot, in document order.
    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// The inventory restricted to the given categories, in document order.
    ///
    /// This is what a specialist stage receives - never the full prose.
    pub fn inventory(&self, categories: &[SlotCategory]) -> Vec<Slot> {
        self.slots
            .iter()
            .filter(|s| categories.contains(&s.category))
            .cloned()
            .collect()
    }

    /// Count of slots in one category.
    pub fn count(&self, category: SlotCategory) -> usize {
        self.slots.iter().filter(|s| s.category == category).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_derives_inventory_in_document_order() {
        let framework = StructureFramework::parse(
            "She pushed the door open. [DESCRIPTION_A] He watched her. [DIALOGUE_B] \
             A chill spread. [INTERNAL_C]",
        )
        .unwrap();

        let ids: Vec<&str> = framework.slots().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["DESCRIPTION_A", "DIALOGUE_B", "INTERNAL_C"]);
    }

    #[test]
    fn test_parse_accepts_cjk_prose() {
        let framework =
            StructureFramework::parse("她推门而入。[DESCRIPTION_A] 他看着她。[DIALOGUE_B]").unwrap();
        assert_eq!(framework.slots().len(), 2);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = StructureFramework::parse("[DIALOGUE_A] text [DIALOGUE_A]").unwrap_err();
        assert!(matches!(err, FrameworkError::DuplicateSlot(id) if id == "DIALOGUE_A"));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let err = StructureFramework::parse("[DIALOGUE_A] and [WEATHER_STORM]").unwrap_err();
        assert!(matches!(err, FrameworkError::UnknownCategory(t) if t == "WEATHER_STORM"));
    }

    #[test]
    fn test_markerless_prose_rejected() {
        assert!(matches!(
            StructureFramework::parse("Just prose, no markers."),
            Err(FrameworkError::NoSlots)
        ));
    }

    #[test]
    fn test_inventory_filters_by_category() {
        let framework = StructureFramework::parse(
            "[DIALOGUE_A] [ACTION_B] [INTERNAL_C] [DESCRIPTION_D] [TRANSITION_E]",
        )
        .unwrap();

        let character = framework.inventory(&[SlotCategory::Dialogue, SlotCategory::Internal]);
        let ids: Vec<&str> = character.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["DIALOGUE_A", "INTERNAL_C"]);

        let scene = framework.inventory(&[SlotCategory::Description, SlotCategory::Action]);
        let ids: Vec<&str> = scene.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["ACTION_B", "DESCRIPTION_D"]);
    }
}
