//! Value objects - Immutable objects defined by their attributes

mod chapter_plan;
mod conflict;
mod editing;
mod slot;

pub use chapter_plan::{
    ChapterPlan, CharacterArcPlan, CharacterProfile, DialogueBeat, PlannedEvent, PlannedScene,
};
pub use conflict::{ConflictKind, ConflictRecord};
pub use editing::{DecisionPriority, EditLogEntry, EditLogKind, EditingDecision, EditingStrategy};
pub use slot::{AgentSource, Slot, SlotCategory, SlotContentMap, SlotMapping};
