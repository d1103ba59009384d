//! Structure stage - Generates the prose skeleton with embedded slot markers
//!
//! The skeleton is the one artifact the whole pipeline hangs off: failure
//! here is fatal to the chapter, there is no fallback skeleton.

use std::sync::Arc;
use std::time::Instant;

use crate::application::dto::{AgentKind, AgentMetadata};
use crate::application::ports::outbound::{
    ChatMessage, CoherenceConstraints, LlmPort, LlmRequest, ProviderError, StructureContext,
};
use crate::domain::entities::{FrameworkError, StructureFramework};
use crate::domain::value_objects::{ChapterPlan, SlotCategory};

/// Errors raised by skeleton generation. All fatal to the chapter.
#[derive(Debug, thiserror::Error)]
pub enum StructureError {
    #[error("LLM error: {0}")]
    Llm(#[from] ProviderError),
    #[error("invalid skeleton: {0}")]
    InvalidFramework(#[from] FrameworkError),
}

/// Input for one skeleton generation.
pub struct StructureRequest<'a> {
    pub plan: &'a ChapterPlan,
    pub chapter_number: u32,
    pub context: &'a StructureContext,
    pub constraints: &'a CoherenceConstraints,
    pub previous_chapter_end: Option<&'a str>,
    /// Target chapter length in characters.
    pub target_length: usize,
    pub story_outline: &'a str,
}

/// The validated skeleton plus agent bookkeeping.
#[derive(Debug, Clone)]
pub struct StructureOutput {
    pub framework: StructureFramework,
    pub metadata: AgentMetadata,
}

/// Service producing the chapter skeleton
pub struct StructureStage<L: LlmPort> {
    llm: Arc<L>,
}

impl<L: LlmPort> StructureStage<L> {
    pub fn new(llm: Arc<L>) -> Self {
        Self { llm }
    }

    /// Generate and validate the skeleton for one chapter.
    pub async fn generate(
        &self,
        request: &StructureRequest<'_>,
    ) -> Result<StructureOutput, StructureError> {
        let started = Instant::now();
        tracing::info!(
            chapter = request.chapter_number,
            title = %request.plan.title,
            "structure stage generating skeleton"
        );

        let llm_request = LlmRequest::new(vec![ChatMessage::user(self.build_user_prompt(request))])
            .with_system_prompt(self.build_system_prompt())
            .with_temperature(0.7)
            .with_top_p(0.9)
            .with_top_k(40);

        let response = self.llm.generate(llm_request).await?;
        let framework = StructureFramework::parse(response.content.trim())?;

        for category in SlotCategory::ALL {
            tracing::debug!(
                category = category.prefix(),
                count = framework.count(category),
                "skeleton slot inventory"
            );
        }

        let metadata = AgentMetadata {
            kind: AgentKind::Structure,
            elapsed_ms: started.elapsed().as_millis() as u64,
            confidence: 85,
            notes: vec![format!(
                "generated skeleton with {} slots",
                framework.slots().len()
            )],
        };

        Ok(StructureOutput { framework, metadata })
    }

    fn build_system_prompt(&self) -> String {
        r#"You are a master story architect specializing in chapter structure and narrative flow. Your job is to write a prose skeleton: flowing chapter text with [SLOT] markers embedded for other specialists to fill.

Critical output requirements:
1. Write actual prose - flowing narrative that reads like a chapter draft
2. Embed [SLOT] markers naturally inside the prose flow
3. Do not write an outline, a framework, or meta-description
4. Do not use intensity annotations like "*intensity: 5/10*"
5. Do not open with "Here is the framework" or any preamble
6. Begin immediately with narrative prose

Slot types to embed naturally:
- [DIALOGUE_X] for spoken exchanges
- [ACTION_X] for physical action and movement
- [INTERNAL_X] for character thoughts and emotion
- [DESCRIPTION_X] for environment and atmosphere
- [TRANSITION_X] for connecting scene changes

Every marker identifier must be uppercase letters, digits, and underscores, and must be unique within the chapter.

Correct output looks like:
"She pushed open the tavern door. [DESCRIPTION_TAVERN_ATMOSPHERE] The landlady's smile was a touch too warm. [DIALOGUE_LANDLADY_GREETING] A chill crept through her stomach. [INTERNAL_HEROINE_UNEASE] Before she could turn to leave, footsteps sounded behind her. [ACTION_APPROACH]"

Your output must be flowing prose with embedded slots - nothing else."#
            .to_string()
    }

    fn build_user_prompt(&self, request: &StructureRequest<'_>) -> String {
        let plan = request.plan;
        let mut prompt = format!(
            "Write the prose skeleton for Chapter {}: \"{}\"\n\n\
             **Story outline - essential context:**\n{}\n\n\
             **Chapter plan to implement:**\n{}\n",
            request.chapter_number,
            plan.title,
            request.story_outline,
            format_chapter_plan(plan),
        );

        if !plan.detailed_scenes.is_empty() {
            prompt.push_str(&format!(
                "\n**Detailed scene structure:**\n{}\n",
                format_scenes(plan)
            ));
        }
        if !plan.chapter_events.is_empty() {
            prompt.push_str(&format!(
                "\n**Planned events:**\n{}\n",
                format_events(plan)
            ));
        }
        if !plan.dialogue_beats.is_empty() {
            prompt.push_str(&format!(
                "\n**Dialogue beats:**\n{}\n",
                format_dialogue_beats(plan)
            ));
        }
        if !plan.character_arcs.is_empty() {
            prompt.push_str(&format!(
                "\n**Character arcs:**\n{}\n",
                format_character_arcs(plan)
            ));
        }

        prompt.push_str(&format!(
            "\n**Structural requirements:**\n\
             - Role in the story: {}\n\
             - Pacing: {}\n\
             - Tension: {}/10\n\
             - Plot threads to advance: {}\n",
            request.context.chapter_role,
            request.context.tempo,
            request.context.tension_level,
            request.context.plot_threads_to_advance.join(", "),
        ));

        if !request.constraints.established_facts.is_empty() {
            prompt.push_str(&format!(
                "\n**Established facts that must hold:**\n{}\n",
                request.constraints.established_facts.join("\n"),
            ));
        }

        match request.previous_chapter_end {
            Some(tail) => prompt.push_str(&format!(
                "\n**Connection to previous chapter:**\nThe previous chapter ended: \"{}\"\n",
                tail_chars(tail, 200),
            )),
            None => prompt.push_str("\n**Connection to previous chapter:**\nThis is the first chapter.\n"),
        }

        prompt.push_str(
            "\n**Emotional curve requirements:**\n\
             Plan an intensity progression, never a flat line:\n\
             - Opening (0-20%): medium intensity (4-6/10), establish the baseline\n\
             - Rising (20-60%): gradual build with peaks and breathing room\n\
             - Climax (70-80%): peak intensity (8-10/10), the chapter's major moment\n\
             - Resolution (80-100%): controlled descent, possibly a hook strike\n",
        );

        prompt.push_str(&format!(
            "\n**Slot allocation targets:**\nTarget chapter length: {} characters\n\n{}\n\
             These are minimums, not caps. Create more slots if the chapter needs them to \
             reach its target length naturally.\n",
            request.target_length,
            density_targets(request.target_length),
        ));

        prompt.push_str(
            "\nNow write the complete prose chapter skeleton - begin immediately with \
             narrative text containing [SLOT] markers:",
        );

        prompt
    }
}

/// Minimum marker counts per category, proportional to target length.
fn density_targets(target_length: usize) -> String {
    let ceil_div = |n: usize, d: usize| n.div_ceil(d);
    format!(
        "- Dialogue slots: {}-{} (spoken exchanges and interplay)\n\
         - Action slots: {}-{} (physical events and movement)\n\
         - Internal slots: {}-{} (thoughts and emotional reactions)\n\
         - Description slots: {}-{} (atmosphere, environment, sensory detail)\n\
         - Transition slots: {}-{} (scene changes and connective tissue)",
        ceil_div(target_length, 500),
        ceil_div(target_length, 400),
        ceil_div(target_length, 1000),
        ceil_div(target_length, 600),
        ceil_div(target_length, 1000),
        ceil_div(target_length, 800),
        ceil_div(target_length, 800),
        ceil_div(target_length, 600),
        ceil_div(target_length, 1200),
        ceil_div(target_length, 1000),
    )
}

/// The last `n` characters of a string, on char boundaries.
pub(crate) fn tail_chars(text: &str, n: usize) -> &str {
    let count = text.chars().count();
    if count <= n {
        return text;
    }
    let skip = count - n;
    let (idx, _) = text.char_indices().nth(skip).unwrap_or((0, ' '));
    &text[idx..]
}

/// Render the plan as prompt text. Also used for the persisted plan field.
pub(crate) fn format_chapter_plan(plan: &ChapterPlan) -> String {
    let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "unspecified".to_string());
    format!(
        "Title: {}\n\
         Summary: {}\n\
         Scene breakdown: {}\n\
         Conflict type: {}\n\
         Tension: {}/10\n\
         Moral dilemma: {}\n\
         Character complexity: {}\n\
         Consequences: {}\n\
         Target length: {}\n\
         Opening hook: {}\n\
         Climax moment: {}\n\
         Chapter ending: {}",
        plan.title,
        plan.summary,
        if plan.scene_breakdown.is_empty() {
            "unspecified"
        } else {
            &plan.scene_breakdown
        },
        opt(&plan.conflict_type),
        plan.tension_level.unwrap_or(5),
        opt(&plan.moral_dilemma),
        opt(&plan.character_complexity),
        opt(&plan.consequences_of_choices),
        plan.target_word_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unspecified".to_string()),
        opt(&plan.opening_hook),
        opt(&plan.climax_moment),
        opt(&plan.chapter_ending),
    )
}

fn format_scenes(plan: &ChapterPlan) -> String {
    plan.detailed_scenes
        .iter()
        .enumerate()
        .map(|(i, scene)| {
            format!(
                "Scene {} ({}):\n  Location: {}\n  Participants: {}\n  Objective: {}\n  \
                 Conflict: {}\n  Outcome: {}\n  Mood: {}\n  Key moments: {}",
                i + 1,
                scene.scene_id,
                scene.location,
                scene.participants.join(", "),
                scene.objective,
                scene.conflict,
                scene.outcome,
                scene.mood,
                scene.key_moments.join("; "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_events(plan: &ChapterPlan) -> String {
    plan.chapter_events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            format!(
                "Event {} ({}):\n  {}\n  Participants: {}\n  Emotional impact: {}/10\n  \
                 Plot significance: {}\n  Consequences: {}",
                i + 1,
                event.event_type.to_uppercase(),
                event.description,
                event.participants.join(", "),
                event.emotional_impact,
                event.plot_significance,
                event.consequences.join("; "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_dialogue_beats(plan: &ChapterPlan) -> String {
    plan.dialogue_beats
        .iter()
        .enumerate()
        .map(|(i, beat)| {
            format!(
                "Dialogue beat {}:\n  Purpose: {}\n  Participants: {}\n  Subtext: {}\n  \
                 Revelations: {}\n  Tensions: {}",
                i + 1,
                beat.purpose,
                beat.participants.join(", "),
                beat.subtext,
                beat.revelations.join("; "),
                beat.tensions.join("; "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_character_arcs(plan: &ChapterPlan) -> String {
    plan.character_arcs
        .iter()
        .map(|arc| {
            format!(
                "{}'s arc:\n  Start: {}\n  End: {}\n  Growth: {}\n  Key moments: {}\n  \
                 Internal conflicts: {}",
                arc.character,
                arc.start_state,
                arc.end_state,
                arc.growth,
                arc.key_moments.join("; "),
                arc.internal_conflicts.join("; "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::outbound::LlmResponse;
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

    fn request_parts() -> (ChapterPlan, StructureContext, CoherenceConstraints) {
        let plan = ChapterPlan {
            title: "The Ledger".to_string(),
            summary: "A forged ledger surfaces.".to_string(),
            tension_level: Some(6),
            ..Default::default()
        };
        let context = StructureContext {
            chapter_role: "rising".to_string(),
            tempo: "moderate".to_string(),
            tension_level: 6,
            plot_threads_to_advance: vec!["the audit".to_string()],
        };
        (plan, context, CoherenceConstraints::default())
    }

    #[tokio::test]
    async fn test_generate_validates_skeleton() {
        let llm = Arc::new(FixedLlm(
            "She opened the ledger. [DESCRIPTION_OFFICE] He said nothing. [DIALOGUE_CLERK]"
                .to_string(),
        ));
        let stage = StructureStage::new(llm);
        let (plan, context, constraints) = request_parts();

        let output = stage
            .generate(&StructureRequest {
                plan: &plan,
                chapter_number: 2,
                context: &context,
                constraints: &constraints,
                previous_chapter_end: Some("The door closed."),
                target_length: 4000,
                story_outline: "An audit uncovers a conspiracy.",
            })
            .await
            .unwrap();

        assert_eq!(output.framework.slots().len(), 2);
        assert_eq!(output.metadata.kind, AgentKind::Structure);
    }

    #[tokio::test]
    async fn test_generate_rejects_markerless_output() {
        let llm = Arc::new(FixedLlm("Prose without any markers.".to_string()));
        let stage = StructureStage::new(llm);
        let (plan, context, constraints) = request_parts();

        let err = stage
            .generate(&StructureRequest {
                plan: &plan,
                chapter_number: 1,
                context: &context,
                constraints: &constraints,
                previous_chapter_end: None,
                target_length: 4000,
                story_outline: "outline",
            })
            .await
            .unwrap_err();

        assert!(matches!(err, StructureError::InvalidFramework(_)));
    }

    #[test]
    fn test_tail_chars_respects_char_boundaries() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("短", 5), "短");
        assert_eq!(tail_chars("她推门而入", 2), "而入");
    }

    #[test]
    fn test_density_targets_scale_with_length() {
        let targets = density_targets(4000);
        assert!(targets.contains("Dialogue slots: 8-10"));
        assert!(targets.contains("Transition slots: 4-4"));
    }
}
