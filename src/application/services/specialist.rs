//! Shared types for the character and scene specialist stages

use crate::application::dto::AgentMetadata;
use crate::application::ports::outbound::ProviderError;
use crate::domain::value_objects::SlotContentMap;

/// Errors raised by a specialist stage.
///
/// Parsing never fails (the slot parser is total), so the only failure mode
/// is the generation call itself.
#[derive(Debug, thiserror::Error)]
pub enum SpecialistError {
    #[error("LLM error: {0}")]
    Llm(#[from] ProviderError),
}

/// A specialist's filled slots plus agent bookkeeping.
#[derive(Debug, Clone)]
pub struct SpecialistOutput {
    pub slots: SlotContentMap,
    pub metadata: AgentMetadata,
}

/// A planned dialogue moment the character stage must serve.
#[derive(Debug, Clone)]
pub struct DialogueRequirement {
    pub slot_id: String,
    pub characters: Vec<String>,
    pub purpose: String,
    pub emotional_tone: String,
    pub subtext: Option<String>,
}

/// The output-format contract block shared by both specialist prompts.
pub(crate) fn format_contract(kind: &str) -> String {
    format!(
        "**Output format - mandatory:**\n\n\
         You must emit slot content in exactly this shape:\n\n\
         [SLOT_NAME]: content on the same line or continuing below\n\n\
         [NEXT_SLOT_NAME]: next content\n\n\
         Do not:\n\
         - Open with an introduction like \"Here are the {kind} slots\"\n\
         - Add commentary or explanations\n\
         - Use numbered lists or markdown headings\n\
         - Embed the slots inside narrative prose\n\n\
         Do:\n\
         - Start each slot with [SLOT_NAME]: followed by its content\n\
         - Separate slots with a blank line\n\n\
         Now produce content for every listed slot in the correct format:"
    )
}
