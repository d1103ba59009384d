//! Scene stage - Fills description and action slots
//!
//! Adapts to the tone guidance the coherence store derives from earlier
//! chapters, and to the scene type detected from the chapter plan.

use std::sync::Arc;
use std::time::Instant;

use crate::application::dto::{AgentKind, AgentMetadata};
use crate::application::ports::outbound::{
    ChatMessage, CoherenceConstraints, LlmPort, LlmRequest, SceneContext, ToneGuidance,
};
use crate::application::services::slot_parser::SlotParser;
use crate::application::services::specialist::{format_contract, SpecialistError, SpecialistOutput};
use crate::domain::value_objects::{ChapterPlan, Slot, SlotCategory};

/// Broad scene classification driving pacing instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneType {
    Action,
    Revelation,
    Emotional,
    Setup,
}

impl SceneType {
    /// Classify a chapter plan from its title and summary.
    pub fn detect(plan: &ChapterPlan) -> SceneType {
        let haystack = format!("{} {}", plan.title, plan.summary).to_lowercase();
        let any = |keywords: &[&str]| keywords.iter().any(|k| haystack.contains(k));

        if any(&["battle", "fight", "chase", "attack", "combat", "ambush"]) {
            SceneType::Action
        } else if any(&["reveal", "truth", "discover", "secret", "conspiracy"]) {
            SceneType::Revelation
        } else if any(&["memory", "emotion", "grief", "remember", "past"]) {
            SceneType::Emotional
        } else {
            SceneType::Setup
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SceneType::Action => "action",
            SceneType::Revelation => "revelation",
            SceneType::Emotional => "emotional",
            SceneType::Setup => "setup",
        }
    }

    fn pacing_instructions(&self) -> &'static str {
        match self {
            SceneType::Action => {
                "Short, punchy sentences (8-12 words). Dense verbs. Minimal description. \
                 Focus on movement and impact."
            }
            SceneType::Emotional => {
                "Longer, flowing sentences (15-20 words). Rich sensory detail. \
                 Atmospheric depth."
            }
            SceneType::Revelation => {
                "Medium sentences (12-15 words). Focus on concrete detail. Clear, \
                 precise description."
            }
            SceneType::Setup => {
                "Varied sentence length. Balance action and description moment by moment."
            }
        }
    }
}

/// Input for one scene-content generation.
pub struct SceneRequest<'a> {
    pub plan: &'a ChapterPlan,
    pub chapter_number: u32,
    pub context: &'a SceneContext,
    pub constraints: &'a CoherenceConstraints,
    /// Slot inventory restricted to Description and Action.
    pub inventory: &'a [Slot],
    pub story_outline: &'a str,
    pub tone_guidance: Option<&'a ToneGuidance>,
    pub genre: Option<&'a str>,
}

/// Service filling description and action slots
pub struct SceneStage<L: LlmPort> {
    llm: Arc<L>,
    parser: SlotParser,
}

impl<L: LlmPort> SceneStage<L> {
    pub fn new(llm: Arc<L>) -> Self {
        Self {
            llm,
            parser: SlotParser::new(),
        }
    }

    /// Generate description and action content for the inventory.
    pub async fn generate(
        &self,
        request: &SceneRequest<'_>,
    ) -> Result<SpecialistOutput, SpecialistError> {
        let started = Instant::now();
        let scene_type = SceneType::detect(request.plan);
        tracing::info!(
            chapter = request.chapter_number,
            scene_type = scene_type.label(),
            "scene stage generating atmosphere and action content"
        );
        if let Some(guidance) = request.tone_guidance {
            tracing::debug!(
                tone = %guidance.current_tone,
                description_length = %guidance.description_length,
                "scene stage adapting to tone guidance"
            );
        }

        let llm_request = LlmRequest::new(vec![ChatMessage::user(
            self.build_user_prompt(request, scene_type),
        )])
        .with_system_prompt(self.build_system_prompt(request.genre))
        .with_temperature(0.8)
        .with_top_p(0.9)
        .with_top_k(40);

        let response = self.llm.generate(llm_request).await?;
        let slots = self.parser.extract(&response.content);

        let metadata = AgentMetadata {
            kind: AgentKind::Scene,
            elapsed_ms: started.elapsed().as_millis() as u64,
            confidence: 85,
            notes: vec![format!(
                "filled {} of {} owned slots ({} scene)",
                slots.len(),
                request.inventory.len(),
                scene_type.label()
            )],
        };

        Ok(SpecialistOutput { slots, metadata })
    }

    fn build_system_prompt(&self, genre: Option<&str>) -> String {
        let genre_note = genre
            .map(|g| format!("Writing in the {} genre.", g.to_uppercase()))
            .unwrap_or_else(|| "Using general fiction techniques.".to_string());

        format!(
            r#"You are a master of atmospheric writing and action sequences. Your specialty is vivid, immersive scenes that engage every sense and put the reader inside the moment.

{genre_note}

Core principles:
- Use all five senses, not only sight and sound
- Specific detail over generic description: "rust-pitted iron" not "old metal"
- Tie sensory detail to character emotion - setting reflects the story's mood
- Action has weight and consequence; show effort and cost, not just results
- No ornamental prose - every detail serves the story

Repetition awareness:
- Avoid over-relying on "heavy", "sharp", "cold", "thick"
- Rotate atmosphere words instead of repeating a favorite
- No stock phrases: "deafening silence", "tension filled the air", "time stood still"

Situational relevance:
- High-tension scenes: no mundane detail (meals, tidying, idle observation)
- Quiet scenes: the right place for daily texture and micro-observation
- Match detail weight to scene urgency

You are writing content for specific slots that must merge seamlessly with another specialist's dialogue and character moments."#
        )
    }

    fn build_user_prompt(&self, request: &SceneRequest<'_>, scene_type: SceneType) -> String {
        let description_slots: Vec<&Slot> = request
            .inventory
            .iter()
            .filter(|s| s.category == SlotCategory::Description)
            .collect();
        let action_slots: Vec<&Slot> = request
            .inventory
            .iter()
            .filter(|s| s.category == SlotCategory::Action)
            .collect();

        let mut prompt = format!(
            "Generate scene content for Chapter {}: \"{}\"\n\n\
             **Story outline - world and atmosphere context:**\n{}\n\n\
             **Detected scene type:** {}\n\
             **Required pacing:** {}\n\n\
             **Setting:**\n\
             Primary location: {}\n\
             Required mood: {}\n\
             Tension: {}\n\
             Sensory focus: {}\n",
            request.chapter_number,
            request.plan.title,
            request.story_outline,
            scene_type.label(),
            scene_type.pacing_instructions(),
            request.context.primary_location.name,
            request.context.mood,
            request.context.tension,
            request.context.sensory_focus.join(", "),
        );

        if let Some(guidance) = request.tone_guidance {
            prompt.push_str(&format!(
                "\n**Tone guidance from earlier chapters:**\n\
                 Current tone: {}\nDescription length: {}\nSentence style: {}\n",
                guidance.current_tone, guidance.description_length, guidance.sentence_style,
            ));
        }

        if !request.constraints.world_rules.is_empty() {
            prompt.push_str(&format!(
                "\n**World rules that must hold:**\n{}\n",
                request.constraints.world_rules.join("\n"),
            ));
        }

        prompt.push_str("\n**Description slots to fill:**\n");
        for (i, slot) in description_slots.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{}] - type: {}\n",
                i + 1,
                slot.id,
                infer_description_type(&slot.id),
            ));
        }

        prompt.push_str("\n**Action slots to fill:**\n");
        for (i, slot) in action_slots.iter().enumerate() {
            prompt.push_str(&format!(
                "{}. [{}] - type: {}\n",
                i + 1,
                slot.id,
                infer_action_type(&slot.id),
            ));
        }

        prompt.push_str("\n");
        prompt.push_str(&format_contract("scene"));
        prompt
    }
}

fn infer_description_type(slot_id: &str) -> &'static str {
    if slot_id.contains("ATMOSPHERE") {
        "ambient mood and environment"
    } else if slot_id.contains("OPENING") {
        "scene establishment and setting"
    } else if slot_id.contains("CONSEQUENCES") {
        "aftermath and environmental impact"
    } else {
        "environment and sensory detail"
    }
}

fn infer_action_type(slot_id: &str) -> &'static str {
    if slot_id.contains("CONFRONTATION") {
        "tense physical exchange"
    } else if slot_id.contains("ESCAPE") {
        "movement and pursuit"
    } else if slot_id.contains("CLIMAX") {
        "peak action moment"
    } else {
        "physical action and movement"
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

    #[test]
    fn test_scene_type_detection() {
        let mut plan = ChapterPlan {
            title: "The Ambush".to_string(),
            summary: "A fight breaks out on the bridge.".to_string(),
            ..Default::default()
        };
        assert_eq!(SceneType::detect(&plan), SceneType::Action);

        plan.title = "What the Ledger Hid".to_string();
        plan.summary = "She discovers the truth behind the audit.".to_string();
        assert_eq!(SceneType::detect(&plan), SceneType::Revelation);

        plan.title = "A Quiet Evening".to_string();
        plan.summary = "Introductions at the manor.".to_string();
        assert_eq!(SceneType::detect(&plan), SceneType::Setup);
    }

    #[tokio::test]
    async fn test_generate_parses_slot_content() {
        let llm = Arc::new(FixedLlm(
            "[DESCRIPTION_BRIDGE]: Fog pooled between the pilings, thick enough to chew.\n\n\
             [ACTION_AMBUSH]: The first bolt took the lantern off its hook."
                .to_string(),
        ));
        let stage = SceneStage::new(llm);

        let plan = ChapterPlan {
            title: "The Ambush".to_string(),
            summary: "A fight breaks out.".to_string(),
            ..Default::default()
        };
        let context = SceneContext::default();
        let constraints = CoherenceConstraints::default();
        let inventory = vec![
            Slot::parse("DESCRIPTION_BRIDGE").unwrap(),
            Slot::parse("ACTION_AMBUSH").unwrap(),
        ];

        let output = stage
            .generate(&SceneRequest {
                plan: &plan,
                chapter_number: 4,
                context: &context,
                constraints: &constraints,
                inventory: &inventory,
                story_outline: "outline",
                tone_guidance: None,
                genre: Some("thriller"),
            })
            .await
            .unwrap();

        assert_eq!(output.slots.len(), 2);
        assert!(output.slots["DESCRIPTION_BRIDGE"].contains("Fog"));
        assert_eq!(output.metadata.kind, AgentKind::Scene);
    }
}
