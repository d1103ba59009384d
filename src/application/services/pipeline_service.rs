//! Pipeline coordinator - Strict sequential phase runner for one chapter
//!
//! Phases run in fixed order: context preparation, specialist generation
//! (structure, then character, then scene - sequential because the
//! specialists consume the finalized slot inventory), synthesis with
//! validation, optional light polish, repetition check, coherence commit.
//! Every phase is wrapped uniformly: duration measured, failure captured
//! into a `PhaseResult`, outcome logged. A failed run triggers at most one
//! whole-pipeline retry with a fresh context, otherwise it returns a
//! structured failure result - never both, never a partial commit, and
//! never a panic past this boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::application::dto::{
    AgentKind, AgentTiming, ChapterGenerationRequest, ChapterGenerationResult, GenerationConfig,
    GenerationMetadata, PhaseOutput, PhaseResult, QualityMetrics,
};
use crate::application::ports::outbound::{
    BalanceIssueKind, ChapterContext, CoherenceStorePort, LimitAction, LlmPort, RepetitionReport,
    RepetitionSeverity,
};
use crate::application::services::character_service::{CharacterRequest, CharacterStage};
use crate::application::services::editing_service::{EditingContext, EditingLoop};
use crate::application::services::scene_service::{SceneRequest, SceneStage};
use crate::application::services::specialist::DialogueRequirement;
use crate::application::services::structure_service::{
    format_chapter_plan, StructureRequest, StructureStage,
};
use crate::application::services::synthesis_service::{SynthesisRequest, SynthesisStage};
use crate::domain::entities::{ChapterRecord, StructureFramework};
use crate::domain::value_objects::{
    ChapterPlan, EditingStrategy, SlotCategory, SlotContentMap,
};

const PHASE_CONTEXT: &str = "context-preparation";
const PHASE_SPECIALISTS: &str = "specialist-generation";
const PHASE_SYNTHESIS: &str = "synthesis-validation";
const PHASE_POLISH: &str = "light-polish";
const PHASE_REPETITION: &str = "repetition-check";
const PHASE_COMMIT: &str = "coherence-commit";

/// Micro-actions inserted to break up long interior runs.
const MICRO_ACTIONS: [&str; 5] = [
    "She shifted in her seat.",
    "He drew a slow breath.",
    "Her gaze dropped.",
    "He tightened his fists.",
    "She looked away.",
];

/// Physical beats inserted between consecutive description blocks.
const ACTION_BEATS: [&str; 4] = [
    "She leaned in a little.",
    "He glanced around the room.",
    "For a moment nothing moved.",
    "Something in the air shifted.",
];

/// Paragraphs longer than this, with no dialogue, count as monologue runs.
const LONG_PARAGRAPH_CHARS: usize = 280;

/// Interior slot content above this word count gets condensed.
const CONDENSE_WORD_LIMIT: usize = 50;

static STACKED_DESCRIPTORS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[a-z]+, ){2,}([a-z]+ )(smell|scent|sound|odor|taste|air|light|silence)")
        .expect("stacked descriptors regex")
});

/// The phase coordinator. Holds the coherence store as an explicitly owned
/// handle; callers must not run two pipelines against one store
/// concurrently (single-writer precondition of the store port).
pub struct ChapterPipeline<L: LlmPort, C: CoherenceStorePort> {
    store: Arc<C>,
    config: GenerationConfig,
    structure: StructureStage<L>,
    character: CharacterStage<L>,
    scene: SceneStage<L>,
    synthesis: SynthesisStage<L>,
    editing: EditingLoop<L>,
}

/// Everything one attempt produced, success or not.
struct Attempt {
    phases: Vec<PhaseResult>,
    timings: BTreeMap<AgentKind, AgentTiming>,
    chapter: Option<ChapterRecord>,
}

struct SpecialistBundle {
    framework: StructureFramework,
    character_slots: SlotContentMap,
    scene_slots: SlotContentMap,
    warnings: Vec<String>,
}

impl<L: LlmPort, C: CoherenceStorePort> ChapterPipeline<L, C> {
    pub fn new(llm: Arc<L>, store: Arc<C>, config: GenerationConfig) -> Self {
        let editing =
            EditingLoop::new(llm.clone()).with_quality_threshold(config.quality_threshold);
        Self {
            store,
            config,
            structure: StructureStage::new(llm.clone()),
            character: CharacterStage::new(llm.clone()),
            scene: SceneStage::new(llm.clone()),
            synthesis: SynthesisStage::new(llm),
            editing,
        }
    }

    /// Generate one chapter. Never panics past this boundary: a failed run
    /// returns a structured result carrying the partial phase trace and a
    /// placeholder chapter body.
    pub async fn generate_chapter(
        &self,
        request: &ChapterGenerationRequest,
    ) -> ChapterGenerationResult {
        let run_started = Instant::now();
        tracing::info!(
            chapter = request.chapter_number,
            title = %request.plan.title,
            "chapter pipeline starting"
        );

        let mut attempt = self.run_attempt(request).await;
        let mut retries = 0;
        while attempt.chapter.is_none() && retries < self.config.max_pipeline_retries {
            retries += 1;
            tracing::warn!(
                chapter = request.chapter_number,
                retry = retries,
                "pipeline attempt failed, retrying with fresh context"
            );
            attempt = self.run_attempt(request).await;
        }

        let success = attempt.chapter.is_some();
        let quality = quality_metrics(&attempt.phases);
        let chapter = match attempt.chapter {
            Some(record) => record,
            None => {
                let reason = attempt
                    .phases
                    .iter()
                    .rev()
                    .find(|p| !p.success)
                    .map(|p| format!("{}: {}", p.name, p.errors.join("; ")))
                    .unwrap_or_else(|| "unknown failure".to_string());
                tracing::error!(chapter = request.chapter_number, %reason, "chapter generation failed");
                ChapterRecord::new(
                    &request.plan.title,
                    format!("Chapter generation failed: {}", reason),
                    format_chapter_plan(&request.plan),
                    &request.plan.summary,
                )
            }
        };

        if success {
            tracing::info!(
                chapter = request.chapter_number,
                elapsed_ms = run_started.elapsed().as_millis() as u64,
                "chapter pipeline complete"
            );
        }

        ChapterGenerationResult {
            success,
            chapter,
            phases: attempt.phases,
            metadata: GenerationMetadata {
                run_id: uuid::Uuid::new_v4(),
                total_time_ms: run_started.elapsed().as_millis() as u64,
                agent_timing: attempt.timings,
                quality,
            },
        }
    }

    /// One pass through every phase. Stops at the first failure.
    async fn run_attempt(&self, request: &ChapterGenerationRequest) -> Attempt {
        let mut attempt = Attempt {
            phases: Vec::new(),
            timings: BTreeMap::new(),
            chapter: None,
        };

        // Phase 1: context preparation.
        let started = Instant::now();
        let context = match self.prepare_context(request).await {
            Ok(context) => {
                tracing::info!(phase = PHASE_CONTEXT, "phase complete");
                attempt.phases.push(PhaseResult::succeeded(
                    PHASE_CONTEXT,
                    elapsed_ms(started),
                    PhaseOutput::Context {
                        plot_threads: context.structure.plot_threads_to_advance.clone(),
                    },
                    Vec::new(),
                ));
                context
            }
            Err(e) => {
                tracing::error!(phase = PHASE_CONTEXT, error = %e, "phase failed");
                attempt
                    .phases
                    .push(PhaseResult::failed(PHASE_CONTEXT, elapsed_ms(started), e));
                return attempt;
            }
        };

        // Phase 2: specialist generation, strictly structure -> character -> scene.
        let started = Instant::now();
        let bundle = match self
            .run_specialists(request, &context, &mut attempt.timings)
            .await
        {
            Ok(bundle) => {
                tracing::info!(phase = PHASE_SPECIALISTS, "phase complete");
                attempt.phases.push(PhaseResult::succeeded(
                    PHASE_SPECIALISTS,
                    elapsed_ms(started),
                    PhaseOutput::Specialists {
                        slot_count: bundle.framework.slots().len(),
                        character_slots: bundle.character_slots.len(),
                        scene_slots: bundle.scene_slots.len(),
                    },
                    bundle.warnings.clone(),
                ));
                bundle
            }
            Err(e) => {
                tracing::error!(phase = PHASE_SPECIALISTS, error = %e, "phase failed");
                attempt
                    .phases
                    .push(PhaseResult::failed(PHASE_SPECIALISTS, elapsed_ms(started), e));
                return attempt;
            }
        };

        // Phase 3: synthesis plus balance validation with bounded auto-correction.
        let started = Instant::now();
        let mut content = match self
            .run_synthesis(request, &bundle, &mut attempt.timings)
            .await
        {
            Ok((content, phase)) => {
                tracing::info!(phase = PHASE_SYNTHESIS, "phase complete");
                attempt.phases.push(phase);
                content
            }
            Err(e) => {
                tracing::error!(phase = PHASE_SYNTHESIS, error = %e, "phase failed");
                attempt
                    .phases
                    .push(PhaseResult::failed(PHASE_SYNTHESIS, elapsed_ms(started), e));
                return attempt;
            }
        };

        // Phase 4: optional light polish through the editing loop.
        if self.config.enable_light_polish {
            let started = Instant::now();
            let editing_context = EditingContext {
                chapter_number: request.chapter_number,
                chapter_content: content.clone(),
                plan: request.plan.clone(),
                plan_text: format_chapter_plan(&request.plan),
                critique_notes: "Light polish only - preserve the specialist content.".to_string(),
            };
            match self.editing.run(&editing_context).await {
                Ok(outcome) => {
                    content = outcome.refined_content.clone();
                    tracing::info!(phase = PHASE_POLISH, "phase complete");
                    attempt.phases.push(PhaseResult::succeeded(
                        PHASE_POLISH,
                        elapsed_ms(started),
                        PhaseOutput::Polish {
                            strategy: outcome.decision.strategy,
                            quality_score: outcome.quality_score,
                            changes_applied: outcome.changes_applied,
                        },
                        Vec::new(),
                    ));
                }
                Err(e) => {
                    // Polish is optional: keep the unpolished text.
                    tracing::warn!(phase = PHASE_POLISH, error = %e, "light polish failed, keeping unpolished text");
                    attempt.phases.push(PhaseResult::succeeded(
                        PHASE_POLISH,
                        elapsed_ms(started),
                        PhaseOutput::Polish {
                            strategy: EditingStrategy::Skip,
                            quality_score: 0,
                            changes_applied: Vec::new(),
                        },
                        vec![format!("light polish failed, kept unpolished text: {}", e)],
                    ));
                }
            }
        }

        // Phase 5: repetition check with bounded substitution.
        let started = Instant::now();
        match self
            .store
            .check_for_repetition(&content, request.chapter_number)
            .await
        {
            Ok(report) => {
                let mut fixed = false;
                let warnings: Vec<String> = report
                    .issues
                    .iter()
                    .filter(|i| i.severity == RepetitionSeverity::High)
                    .map(|i| format!("repeated phrase \"{}\" ({}x)", i.phrase, i.count))
                    .collect();
                if report.severity == RepetitionSeverity::High || report.total_repetitions > 2 {
                    let replaced = apply_repetition_fixes(&content, &report);
                    fixed = replaced != content;
                    content = replaced;
                    if fixed {
                        tracing::info!(
                            chapter = request.chapter_number,
                            "applied repetition fixes"
                        );
                    }
                }
                tracing::info!(phase = PHASE_REPETITION, "phase complete");
                attempt.phases.push(PhaseResult::succeeded(
                    PHASE_REPETITION,
                    elapsed_ms(started),
                    PhaseOutput::Repetition {
                        total_repetitions: report.total_repetitions,
                        fixed,
                    },
                    warnings,
                ));
            }
            Err(e) => {
                tracing::error!(phase = PHASE_REPETITION, error = %e, "phase failed");
                attempt.phases.push(PhaseResult::failed(
                    PHASE_REPETITION,
                    elapsed_ms(started),
                    e.to_string(),
                ));
                return attempt;
            }
        }

        // Phase 6: coherence commit. The only phase that mutates shared
        // cross-chapter state, and it runs at most once per chapter.
        let started = Instant::now();
        let record = ChapterRecord::new(
            &request.plan.title,
            content,
            format_chapter_plan(&request.plan),
            &request.plan.summary,
        );
        match self
            .store
            .update_from_generated_chapter(&record, request.chapter_number)
            .await
        {
            Ok(()) => {
                tracing::info!(phase = PHASE_COMMIT, "phase complete");
                attempt.phases.push(PhaseResult::succeeded(
                    PHASE_COMMIT,
                    elapsed_ms(started),
                    PhaseOutput::Commit {
                        chapter_number: request.chapter_number,
                    },
                    Vec::new(),
                ));
                attempt.chapter = Some(record);
            }
            Err(e) => {
                tracing::error!(phase = PHASE_COMMIT, error = %e, "phase failed");
                attempt.phases.push(PhaseResult::failed(
                    PHASE_COMMIT,
                    elapsed_ms(started),
                    e.to_string(),
                ));
            }
        }

        attempt
    }

    async fn prepare_context(
        &self,
        request: &ChapterGenerationRequest,
    ) -> Result<ChapterContext, String> {
        if request.chapter_number == 1 {
            self.store
                .initialize_from_outline(
                    &request.story_outline,
                    &request.characters,
                    self.config.chapter_count,
                )
                .await
                .map_err(|e| e.to_string())?;
        }

        let context = self
            .store
            .prepare_chapter_context(request.chapter_number, &request.plan)
            .await
            .map_err(|e| e.to_string())?;

        tracing::info!(
            plot_threads = context.structure.plot_threads_to_advance.len(),
            "chapter context prepared"
        );
        Ok(context)
    }

    async fn run_specialists(
        &self,
        request: &ChapterGenerationRequest,
        context: &ChapterContext,
        timings: &mut BTreeMap<AgentKind, AgentTiming>,
    ) -> Result<SpecialistBundle, String> {
        let mut warnings = Vec::new();

        // Structure first: the specialists need its finalized inventory.
        let structure_output = self
            .structure
            .generate(&StructureRequest {
                plan: &request.plan,
                chapter_number: request.chapter_number,
                context: &context.structure,
                constraints: &context.constraints,
                previous_chapter_end: request.previous_chapter_end.as_deref(),
                target_length: request.target_length,
                story_outline: &request.story_outline,
            })
            .await
            .map_err(|e| e.to_string())?;
        record_timing(timings, &structure_output.metadata);
        let framework = structure_output.framework;

        let dialogue_requirements =
            derive_dialogue_requirements(&request.plan, &request.characters);

        // Character second, restricted to its owned inventory.
        let character_inventory =
            framework.inventory(&[SlotCategory::Dialogue, SlotCategory::Internal]);
        let character_output = self
            .character
            .generate(&CharacterRequest {
                plan: &request.plan,
                chapter_number: request.chapter_number,
                context: &context.character,
                constraints: &context.constraints,
                inventory: &character_inventory,
                dialogue_requirements: &dialogue_requirements,
                story_outline: &request.story_outline,
                genre: request.genre.as_deref(),
            })
            .await
            .map_err(|e| e.to_string())?;
        record_timing(timings, &character_output.metadata);
        let mut character_slots = character_output.slots;

        // Content limits drive bounded local corrections, not aborts.
        let joined: String = character_slots.values().cloned().collect::<Vec<_>>().join("\n\n");
        let limit_check = self
            .store
            .check_content_limits("character", &joined)
            .await
            .map_err(|e| e.to_string())?;
        if !limit_check.allowed {
            let reason = limit_check.reason.unwrap_or_else(|| "limit exceeded".to_string());
            tracing::warn!(%reason, "character content exceeded limits");
            warnings.push(format!("content limits exceeded: {}", reason));
            match limit_check.suggested_action {
                Some(LimitAction::CondenseInternal) => {
                    condense_internal_slots(&mut character_slots);
                    warnings.push("condensed internal monologue".to_string());
                }
                Some(LimitAction::AddMicroAction) => {
                    add_micro_actions_to_internal_slots(&mut character_slots);
                    warnings.push("inserted micro-actions into internal blocks".to_string());
                }
                None => {}
            }
        }

        // Scene last, with tone guidance from the store.
        let tone_guidance = self
            .store
            .tone_guidance_for_scene()
            .await
            .map_err(|e| e.to_string())?;
        let scene_inventory =
            framework.inventory(&[SlotCategory::Description, SlotCategory::Action]);
        let scene_output = self
            .scene
            .generate(&SceneRequest {
                plan: &request.plan,
                chapter_number: request.chapter_number,
                context: &context.scene,
                constraints: &context.constraints,
                inventory: &scene_inventory,
                story_outline: &request.story_outline,
                tone_guidance: Some(&tone_guidance),
                genre: request.genre.as_deref(),
            })
            .await
            .map_err(|e| e.to_string())?;
        record_timing(timings, &scene_output.metadata);

        Ok(SpecialistBundle {
            framework,
            character_slots,
            scene_slots: scene_output.slots,
            warnings,
        })
    }

    async fn run_synthesis(
        &self,
        request: &ChapterGenerationRequest,
        bundle: &SpecialistBundle,
        timings: &mut BTreeMap<AgentKind, AgentTiming>,
    ) -> Result<(String, PhaseResult), String> {
        let started = Instant::now();
        let output = self
            .synthesis
            .integrate(&SynthesisRequest {
                framework: &bundle.framework,
                character_slots: &bundle.character_slots,
                scene_slots: &bundle.scene_slots,
                chapter_number: request.chapter_number,
                chapter_title: &request.plan.title,
            })
            .await
            .map_err(|e| e.to_string())?;
        record_timing(timings, &output.metadata);

        let mut warnings: Vec<String> = output
            .unresolved_slots
            .iter()
            .map(|id| format!("unresolved slot [{}] left visible in output", id))
            .collect();

        // Balance findings are non-fatal: they drive bounded rewrites.
        let mut content = output.integrated_chapter.clone();
        let balance = self
            .store
            .validate_chapter_balance()
            .await
            .map_err(|e| e.to_string())?;
        for issue in &balance.issues {
            match issue.kind {
                BalanceIssueKind::DescriptionOverload => {
                    content = reduce_description_density(&content);
                    warnings.push("reduced description density".to_string());
                }
                BalanceIssueKind::InternalOverload => {
                    content = break_up_long_paragraphs(&content, &MICRO_ACTIONS);
                    warnings.push("broke up internal monologue blocks".to_string());
                }
                BalanceIssueKind::ConsecutiveDescription => {
                    content = break_up_long_paragraphs(&content, &ACTION_BEATS);
                    warnings.push("inserted action beats between description runs".to_string());
                }
            }
        }

        let phase = PhaseResult::succeeded(
            PHASE_SYNTHESIS,
            elapsed_ms(started),
            PhaseOutput::Synthesis {
                conflicts: output.conflicts,
                hooks_added: output.hooks_added,
                unresolved_slots: output.unresolved_slots,
                confidence: output.confidence,
            },
            warnings,
        );
        Ok((content, phase))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn record_timing(
    timings: &mut BTreeMap<AgentKind, AgentTiming>,
    metadata: &crate::application::dto::AgentMetadata,
) {
    timings.insert(
        metadata.kind,
        AgentTiming {
            elapsed_ms: metadata.elapsed_ms,
            confidence: metadata.confidence,
        },
    );
}

/// Quality metrics derived from the phase trace.
fn quality_metrics(phases: &[PhaseResult]) -> QualityMetrics {
    let all_ok = !phases.is_empty() && phases.iter().all(|p| p.success);
    let synthesis_ok = phases.iter().any(|p| p.name == PHASE_SYNTHESIS && p.success);
    let polish_ok = phases.iter().any(|p| p.name == PHASE_POLISH && p.success);
    QualityMetrics {
        coherence: if all_ok { 90 } else { 60 },
        integration: if synthesis_ok { 85 } else { 50 },
        polish: if polish_ok { 80 } else { 70 },
    }
}

/// Derive planned dialogue requirements from the chapter plan.
pub(crate) fn derive_dialogue_requirements(
    plan: &ChapterPlan,
    characters: &[crate::domain::value_objects::CharacterProfile],
) -> Vec<DialogueRequirement> {
    let active: Vec<String> = if characters.is_empty() {
        vec!["protagonist".to_string()]
    } else {
        characters.iter().map(|c| c.name.clone()).collect()
    };
    let tone = plan
        .emotional_tone
        .clone()
        .unwrap_or_else(|| "neutral".to_string());
    let mut requirements = Vec::new();

    if plan.character_development_focus.is_some() {
        requirements.push(DialogueRequirement {
            slot_id: "DIALOGUE_CHARACTER_DEVELOPMENT".to_string(),
            characters: active.iter().take(2).cloned().collect(),
            purpose: "character development and relationship building".to_string(),
            emotional_tone: tone.clone(),
            subtext: plan.character_complexity.clone(),
        });
    }

    if let Some(conflict_type) = &plan.conflict_type {
        requirements.push(DialogueRequirement {
            slot_id: "DIALOGUE_CONFLICT".to_string(),
            characters: active.clone(),
            purpose: format!("work the {} conflict", conflict_type),
            emotional_tone: plan
                .emotional_tone
                .clone()
                .unwrap_or_else(|| "tense".to_string()),
            subtext: None,
        });
    }

    if plan.plot_advancement.is_some() {
        requirements.push(DialogueRequirement {
            slot_id: "DIALOGUE_PLOT".to_string(),
            characters: active.iter().take(2).cloned().collect(),
            purpose: "advance the main plot".to_string(),
            emotional_tone: tone.clone(),
            subtext: None,
        });
    }

    if requirements.is_empty() {
        requirements.push(DialogueRequirement {
            slot_id: "DIALOGUE_MAIN".to_string(),
            characters: active.iter().take(2).cloned().collect(),
            purpose: "move the story forward".to_string(),
            emotional_tone: tone,
            subtext: None,
        });
    }

    requirements
}

/// Truncate interior slot content that runs past the word limit.
pub(crate) fn condense_internal_slots(slots: &mut SlotContentMap) {
    for (id, content) in slots.iter_mut() {
        if !id.starts_with("INTERNAL_") {
            continue;
        }
        let words: Vec<&str> = content.split_whitespace().collect();
        if words.len() > CONDENSE_WORD_LIMIT {
            *content = format!("{}...", words[..CONDENSE_WORD_LIMIT].join(" "));
        }
    }
}

/// Append a micro-action to overlong interior slot content, cycling
/// through the table in slot-id order so the result is deterministic.
pub(crate) fn add_micro_actions_to_internal_slots(slots: &mut SlotContentMap) {
    let mut index = 0usize;
    for (id, content) in slots.iter_mut() {
        if !id.starts_with("INTERNAL_") || content.chars().count() <= LONG_PARAGRAPH_CHARS {
            continue;
        }
        content.push_str("\n\n");
        content.push_str(MICRO_ACTIONS[index % MICRO_ACTIONS.len()]);
        index += 1;
    }
}

/// Collapse stacked descriptors in front of sensory nouns.
pub(crate) fn reduce_description_density(content: &str) -> String {
    STACKED_DESCRIPTORS_RE
        .replace_all(content, "$1$2")
        .into_owned()
}

/// Insert a beat between consecutive long quote-free paragraphs.
pub(crate) fn break_up_long_paragraphs(content: &str, beats: &[&str]) -> String {
    let paragraphs: Vec<&str> = content.split("\n\n").collect();
    if paragraphs.len() < 2 {
        return content.to_string();
    }

    let is_long_run = |p: &str| {
        p.chars().count() > LONG_PARAGRAPH_CHARS && !p.contains('"') && !p.contains('\u{201c}')
    };

    let mut result: Vec<String> = Vec::new();
    let mut beat_index = 0usize;
    for (i, paragraph) in paragraphs.iter().enumerate() {
        result.push(paragraph.to_string());
        if let Some(next) = paragraphs.get(i + 1) {
            if is_long_run(paragraph) && is_long_run(next) {
                result.push(beats[beat_index % beats.len()].to_string());
                beat_index += 1;
            }
        }
    }
    result.join("\n\n")
}

/// Replace every occurrence after the first of each high-severity repeated
/// phrase, using the category-keyed alternative table. Phrases without a
/// table entry stay untouched.
pub(crate) fn apply_repetition_fixes(content: &str, report: &RepetitionReport) -> String {
    let mut fixed = content.to_string();
    for issue in &report.issues {
        if issue.severity != RepetitionSeverity::High {
            continue;
        }
        let Some(replacement) = alternative_phrase(&issue.phrase, &issue.category) else {
            continue;
        };

        let positions: Vec<usize> = fixed.match_indices(&issue.phrase).map(|(i, _)| i).collect();
        // Keep the first occurrence, replace the rest back-to-front so the
        // recorded positions stay valid.
        for pos in positions.into_iter().skip(1).rev() {
            fixed.replace_range(pos..pos + issue.phrase.len(), &replacement);
        }
    }
    fixed
}

/// Category-keyed alternative for an overused phrase.
pub(crate) fn alternative_phrase(phrase: &str, category: &str) -> Option<String> {
    let table: &[(&str, &str)] = match category {
        "metaphors" => &[
            ("her heart clenched", "her chest tightened"),
            ("heart skipped a beat", "pulse stumbled"),
            ("a chill ran down her spine", "cold crawled along her back"),
            ("his blood ran cold", "the warmth drained out of him"),
        ],
        "sensory" => &[
            ("the acrid smell of blood", "the sick tang of rust"),
            ("deafening silence", "a silence with weight to it"),
            ("the air was thick", "the air pressed close"),
            ("a bone-deep cold", "a cold that settled in the joints"),
        ],
        "emotional" => &[
            ("fear gripped", "dread settled over"),
            ("panic rose", "alarm crept up"),
            ("terror washed over", "fright broke across"),
        ],
        _ => return None,
    };

    let lower = phrase.to_lowercase();
    for (from, to) in table {
        if let Some(pos) = lower.find(from) {
            let mut replaced = phrase.to_string();
            replaced.replace_range(pos..pos + from.len(), to);
            return Some(replaced);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::outbound::RepetitionIssue;

    #[test]
    fn test_condense_internal_slots_truncates_long_runs() {
        let mut slots = SlotContentMap::new();
        let long = (0..80).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        slots.insert("INTERNAL_A".to_string(), long);
        slots.insert("DIALOGUE_B".to_string(), "short".to_string());

        condense_internal_slots(&mut slots);

        assert!(slots["INTERNAL_A"].ends_with("..."));
        assert_eq!(slots["INTERNAL_A"].split_whitespace().count(), CONDENSE_WORD_LIMIT);
        assert_eq!(slots["DIALOGUE_B"], "short");
    }

    #[test]
    fn test_micro_actions_only_touch_overlong_internal_slots() {
        let mut slots = SlotContentMap::new();
        slots.insert("INTERNAL_A".to_string(), "x".repeat(400));
        slots.insert("INTERNAL_B".to_string(), "brief thought".to_string());

        add_micro_actions_to_internal_slots(&mut slots);

        assert!(slots["INTERNAL_A"].contains(MICRO_ACTIONS[0]));
        assert_eq!(slots["INTERNAL_B"], "brief thought");
    }

    #[test]
    fn test_reduce_description_density_collapses_stacks() {
        let content = "A sharp, sour, acrid smell drifted from the cellar.";
        let reduced = reduce_description_density(content);
        assert_eq!(reduced, "A acrid smell drifted from the cellar.");
    }

    #[test]
    fn test_break_up_long_paragraphs_inserts_beats() {
        let long = "Only description here. ".repeat(20);
        let content = format!("{}\n\n{}", long.trim(), long.trim());
        let result = break_up_long_paragraphs(&content, &ACTION_BEATS);
        assert!(result.contains(ACTION_BEATS[0]));
        assert_eq!(result.split("\n\n").count(), 3);
    }

    #[test]
    fn test_break_up_skips_dialogue_paragraphs() {
        let long_quote = format!("\"Talk,\" she said. {}", "More talking. ".repeat(30));
        let content = format!("{}\n\n{}", long_quote.trim(), long_quote.trim());
        let result = break_up_long_paragraphs(&content, &ACTION_BEATS);
        assert_eq!(result, content);
    }

    #[test]
    fn test_apply_repetition_fixes_preserves_first_occurrence() {
        let content = "Her heart skipped a beat. Later, her heart skipped a beat again.";
        let report = RepetitionReport {
            total_repetitions: 1,
            severity: RepetitionSeverity::High,
            issues: vec![RepetitionIssue {
                phrase: "heart skipped a beat".to_string(),
                count: 2,
                severity: RepetitionSeverity::High,
                category: "metaphors".to_string(),
            }],
        };

        let fixed = apply_repetition_fixes(content, &report);
        assert_eq!(fixed.matches("heart skipped a beat").count(), 1);
        assert!(fixed.contains("pulse stumbled"));
        assert!(fixed.starts_with("Her heart skipped a beat."));
    }

    #[test]
    fn test_alternative_phrase_unknown_category() {
        assert!(alternative_phrase("anything", "unknown").is_none());
        assert!(alternative_phrase("no table entry", "metaphors").is_none());
    }

    #[test]
    fn test_derive_dialogue_requirements_defaults() {
        let plan = ChapterPlan::default();
        let requirements = derive_dialogue_requirements(&plan, &[]);
        assert_eq!(requirements.len(), 1);
        assert_eq!(requirements[0].slot_id, "DIALOGUE_MAIN");
        assert_eq!(requirements[0].characters, vec!["protagonist".to_string()]);
    }

    #[test]
    fn test_derive_dialogue_requirements_from_plan() {
        let plan = ChapterPlan {
            conflict_type: Some("interpersonal".to_string()),
            plot_advancement: Some("the audit closes in".to_string()),
            ..Default::default()
        };
        let requirements = derive_dialogue_requirements(&plan, &[]);
        let ids: Vec<&str> = requirements.iter().map(|r| r.slot_id.as_str()).collect();
        assert_eq!(ids, vec!["DIALOGUE_CONFLICT", "DIALOGUE_PLOT"]);
    }

    #[test]
    fn test_quality_metrics_follow_phase_trace() {
        let phases = vec![
            PhaseResult::succeeded(PHASE_SYNTHESIS, 1, PhaseOutput::Commit { chapter_number: 1 }, vec![]),
            PhaseResult::failed(PHASE_COMMIT, 1, "boom"),
        ];
        let metrics = quality_metrics(&phases);
        assert_eq!(metrics.coherence, 60);
        assert_eq!(metrics.integration, 85);
        assert_eq!(metrics.polish, 70);
    }
}
