//! Character stage - Fills dialogue and internal-monologue slots
//!
//! Receives the slot inventory restricted to its owned categories, never
//! the full skeleton, and recovers content through the slot parser.

use std::sync::Arc;
use std::time::Instant;

use crate::application::dto::{AgentKind, AgentMetadata};
use crate::application::ports::outbound::{
    ChatMessage, CharacterContext, CoherenceConstraints, LlmPort, LlmRequest,
};
use crate::application::services::slot_parser::SlotParser;
use crate::application::services::specialist::{
    format_contract, DialogueRequirement, SpecialistError, SpecialistOutput,
};
use crate::domain::value_objects::{ChapterPlan, Slot, SlotCategory};

/// Input for one character-content generation.
pub struct CharacterRequest<'a> {
    pub plan: &'a ChapterPlan,
    pub chapter_number: u32,
    pub context: &'a CharacterContext,
    pub constraints: &'a CoherenceConstraints,
    /// Slot inventory restricted to Dialogue and Internal.
    pub inventory: &'a [Slot],
    pub dialogue_requirements: &'a [DialogueRequirement],
    pub story_outline: &'a str,
    pub genre: Option<&'a str>,
}

/// Service filling dialogue and internal slots
pub struct CharacterStage<L: LlmPort> {
    llm: Arc<L>,
    parser: SlotParser,
}

impl<L: LlmPort> CharacterStage<L> {
    pub fn new(llm: Arc<L>) -> Self {
        Self {
            llm,
            parser: SlotParser::new(),
        }
    }

    /// Generate dialogue and internal-monologue content for the inventory.
    pub async fn generate(
        &self,
        request: &CharacterRequest<'_>,
    ) -> Result<SpecialistOutput, SpecialistError> {
        let started = Instant::now();
        let dialogue_count = request
            .inventory
            .iter()
            .filter(|s| s.category == SlotCategory::Dialogue)
            .count();
        tracing::info!(
            chapter = request.chapter_number,
            dialogue_slots = dialogue_count,
            "character stage generating dialogue and internal content"
        );

        let llm_request = LlmRequest::new(vec![ChatMessage::user(self.build_user_prompt(request))])
            .with_system_prompt(self.build_system_prompt(request.genre))
            .with_temperature(0.8)
            .with_top_p(0.9)
            .with_top_k(40);

        let response = self.llm.generate(llm_request).await?;
        let slots = self.parser.extract(&response.content);

        for (id, content) in &slots {
            tracing::debug!(slot = %id, chars = content.chars().count(), "character slot filled");
        }

        let metadata = AgentMetadata {
            kind: AgentKind::Character,
            elapsed_ms: started.elapsed().as_millis() as u64,
            confidence: 80,
            notes: vec![format!(
                "filled {} of {} owned slots",
                slots.len(),
                request.inventory.len()
            )],
        };

        Ok(SpecialistOutput { slots, metadata })
    }

    fn build_system_prompt(&self, genre: Option<&str>) -> String {
        let genre_note = genre
            .map(|g| format!("Writing in the {} genre.", g.to_uppercase()))
            .unwrap_or_else(|| "Using general fiction techniques.".to_string());

        format!(
            r#"You are a specialist in character development and dialogue. Your job is to write authentic, emotionally resonant dialogue and interior moments.

{genre_note}

Core principles:
- Every line of dialogue carries subtext - characters rarely say exactly what they mean
- Show contradiction and unexpected reaction instead of labeling feelings
- Use natural speech patterns: interruptions, hesitations, misunderstandings
- Emotional truth over literary polish
- Each character keeps a distinct voice and rhythm

Show-don't-tell rules:
- Never write "she felt [emotion]" - show it through action, dialogue, physical response
- Never write "he looked [emotion]" - describe the specific physical detail
- Express feeling through the body: "anger burned like acid", "fear spread like frost"

Repetition awareness:
- Avoid leaning on the same intensifiers: "heavy", "sharp", "cold", "deep"
- Vary sentence openings - not every line should start with a pronoun plus body part
- No stock phrases: "her heart skipped a beat", "time stood still"

Internal monologue:
- Keep each interior slot under roughly 150 words
- Break long thought runs with micro-actions (a breath, a glance, a shift)
- Mix significant realizations with stray observations - minds are nonlinear

You will receive specific slot requirements. Write content for each slot that merges seamlessly into the surrounding narrative."#
        )
    }

    fn build_user_prompt(&self, request: &CharacterRequest<'_>) -> String {
        let dialogue_slots: Vec<&Slot> = request
            .inventory
            .iter()
            .filter(|s| s.category == SlotCategory::Dialogue)
            .collect();
        let internal_slots: Vec<&Slot> = request
            .inventory
            .iter()
            .filter(|s| s.category == SlotCategory::Internal)
            .collect();

        let mut prompt = format!(
            "Generate character content for Chapter {}: \"{}\"\n\n\
             **Story outline - character arc context:**\n{}\n\n\
             **Active characters:** {}\n\n\
             **Character states:**\n{}\n",
            request.chapter_number,
            request.plan.title,
            request.story_outline,
            request.context.active_characters.join(", "),
            format_character_states(request.context),
        );

        if let Some(dilemma) = &request.plan.moral_dilemma {
            prompt.push_str(&format!("\n**Chapter emotional journey:**\n{}\n", dilemma));
        }
        if let Some(complexity) = &request.plan.character_complexity {
            prompt.push_str(&format!("Character complexity focus: {}\n", complexity));
        }
        if !request.constraints.relationships.is_empty() {
            prompt.push_str(&format!(
                "\n**Relationships that must hold:**\n{}\n",
                request.constraints.relationships.join("\n"),
            ));
        }

        prompt.push_str("\n**Dialogue slots to fill:**\n");
        for (i, slot) in dialogue_slots.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{}] - purpose: {}\n",
                i + 1,
                slot.id,
                infer_dialogue_purpose(&slot.id),
            ));
        }

        prompt.push_str("\n**Internal-thought slots to fill:**\n");
        for (i, slot) in internal_slots.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{}] - focus: {}\n",
                i + 1,
                slot.id,
                infer_internal_focus(&slot.id),
            ));
        }

        if !request.dialogue_requirements.is_empty() {
            prompt.push_str("\n**Planned dialogue requirements:**\n");
            for req in request.dialogue_requirements {
                prompt.push_str(&format!(
                    "- [{}] between {}: {} (tone: {}{})\n",
                    req.slot_id,
                    req.characters.join(" and "),
                    req.purpose,
                    req.emotional_tone,
                    req.subtext
                        .as_deref()
                        .map(|s| format!(", subtext: {}", s))
                        .unwrap_or_default(),
                ));
            }
        }

        prompt.push_str("\n");
        prompt.push_str(&format_contract("dialogue"));
        prompt
    }
}

fn format_character_states(context: &CharacterContext) -> String {
    if context.character_states.is_empty() {
        return "No tracked character state.".to_string();
    }
    context
        .character_states
        .iter()
        .map(|(name, state)| {
            format!(
                "{}: location - {}, emotional state - {}",
                name,
                state.location,
                if state.primary_emotion.is_empty() {
                    "unknown"
                } else {
                    &state.primary_emotion
                }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn infer_dialogue_purpose(slot_id: &str) -> &'static str {
    if slot_id.contains("GREETING") {
        "initial interaction, establish mood"
    } else if slot_id.contains("CONFLICT") {
        "confrontation, escalating tension"
    } else if slot_id.contains("REVELATION") {
        "information reveal, plot advancement"
    } else {
        "character interplay and development"
    }
}

fn infer_internal_focus(slot_id: &str) -> &'static str {
    if slot_id.contains("SUSPICION") {
        "growing doubt and uncertainty"
    } else if slot_id.contains("REACTION") {
        "processing new information"
    } else if slot_id.contains("RESOLVE") {
        "decision and determination"
    } else {
        "emotional state and thought"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::outbound::{LlmResponse, ProviderError};
    use async_trait::async_trait;

    struct FixedLlm(String);

    #[async_trait]
    impl LlmPort for FixedLlm {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, ProviderError> {
            Ok(LlmResponse {
                content: self.0.clone(),
                finish_reason: Some("stop".to_string()),
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_generate_parses_slot_content() {
        let llm = Arc::new(FixedLlm(
            "[DIALOGUE_CLERK]: \"You shouldn't be here.\"\n\n\
             [INTERNAL_DOUBT]: The ledger had been moved. She was sure of it now."
                .to_string(),
        ));
        let stage = CharacterStage::new(llm);

        let plan = ChapterPlan {
            title: "The Ledger".to_string(),
            summary: "A forged ledger surfaces.".to_string(),
            ..Default::default()
        };
        let context = CharacterContext::default();
        let constraints = CoherenceConstraints::default();
        let inventory = vec![
            Slot::parse("DIALOGUE_CLERK").unwrap(),
            Slot::parse("INTERNAL_DOUBT").unwrap(),
        ];

        let output = stage
            .generate(&CharacterRequest {
                plan: &plan,
                chapter_number: 3,
                context: &context,
                constraints: &constraints,
                inventory: &inventory,
                dialogue_requirements: &[],
                story_outline: "outline",
                genre: None,
            })
            .await
            .unwrap();

        assert_eq!(output.slots.len(), 2);
        assert!(output.slots["INTERNAL_DOUBT"].contains("ledger"));
        assert_eq!(output.metadata.kind, AgentKind::Character);
    }

    #[tokio::test]
    async fn test_generate_tolerates_unparsable_output() {
        let llm = Arc::new(FixedLlm("I could not produce slot content.".to_string()));
        let stage = CharacterStage::new(llm);

        let plan = ChapterPlan::default();
        let context = CharacterContext::default();
        let constraints = CoherenceConstraints::default();

        let output = stage
            .generate(&CharacterRequest {
                plan: &plan,
                chapter_number: 1,
                context: &context,
                constraints: &constraints,
                inventory: &[],
                dialogue_requirements: &[],
                story_outline: "",
                genre: None,
            })
            .await
            .unwrap();

        assert!(output.slots.is_empty());
    }
}
