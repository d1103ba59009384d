//! Synthesis stage - Merges the skeleton and specialist outputs into prose
//!
//! A state-free function of its inputs: merge the slot maps under the fixed
//! priority rule, detect cross-agent conflicts (detection only - the only
//! resolution policy is priority override), generate a closing hook, and
//! assemble the final chapter. Assembly prefers an assisted low-temperature
//! pass and degrades to deterministic literal substitution; markers that
//! survive assembly stay visible and are reported, never silently dropped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::application::dto::{AgentKind, AgentMetadata};
use crate::application::ports::outbound::{ChatMessage, LlmPort, LlmRequest};
use crate::domain::entities::{StructureFramework, MARKER_RE};
use crate::domain::value_objects::{
    AgentSource, ConflictKind, ConflictRecord, Slot, SlotContentMap, SlotMapping,
};

/// Generic closing transitions used when hook generation fails.
const STATIC_TRANSITIONS: [&str; 8] = [
    "A heartbeat later, everything changed.",
    "For a long moment, nobody spoke.",
    "Meanwhile, far beyond the city walls, something stirred.",
    "The scene shifted like a turned page.",
    "In the space of a breath, it was done.",
    "By the time the lamps were lit, nothing was the same.",
    "And that was when the knock came.",
    "Somewhere below, a door opened.",
];

/// Grim-register words for tone-drift detection.
const GRIM_WORDS: [&str; 6] = ["blood", "corpse", "grief", "dread", "funeral", "wound"];
/// Light-register words for tone-drift detection.
const LIGHT_WORDS: [&str; 6] = ["giggle", "joke", "cheerful", "grinned", "laughter", "merry"];

/// Early time-of-day markers for cross-slot contradiction checks.
const MORNING_WORDS: [&str; 3] = ["morning", "dawn", "sunrise"];
/// Late time-of-day markers for cross-slot contradiction checks.
const NIGHT_WORDS: [&str; 3] = ["midnight", "moonlight", "night sky"];

/// Low power-tier vocabulary for scale-escalation detection.
const LOW_TIER_WORDS: [&str; 4] = ["novice", "apprentice", "fledgling", "first-rank"];
/// Apex power-tier vocabulary for scale-escalation detection.
const APEX_TIER_WORDS: [&str; 4] = ["transcendent", "godlike", "ninth-rank", "apex"];

static SYSTEM_REWARD_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)system reward").expect("system reward regex"),
        Regex::new(r"(?i)congratulations,? host").expect("host regex"),
        Regex::new(r"(?i)quest complete[^.]*reward").expect("quest regex"),
        Regex::new(r"(?i)level(?:ed)? up[^.]*attribute points").expect("level regex"),
    ]
});

/// Action-slot sentences averaging more words than this read slow.
const ACTION_PACE_WORDS: usize = 22;

/// Errors raised by synthesis. Everything else degrades internally.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis produced no merged text")]
    EmptyMerge,
}

/// Input for one synthesis run.
pub struct SynthesisRequest<'a> {
    pub framework: &'a StructureFramework,
    pub character_slots: &'a SlotContentMap,
    pub scene_slots: &'a SlotContentMap,
    pub chapter_number: u32,
    pub chapter_title: &'a str,
}

/// The merged chapter plus everything synthesis learned along the way.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    pub integrated_chapter: String,
    /// Accepted hook candidates; exactly one is appended to the chapter.
    pub hooks_added: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
    /// Slot ids whose markers survived assembly, left visible in the text.
    pub unresolved_slots: Vec<String>,
    pub confidence: u8,
    pub metadata: AgentMetadata,
}

/// Service merging specialist outputs into final chapter prose
pub struct SynthesisStage<L: LlmPort> {
    llm: Arc<L>,
}

impl<L: LlmPort> SynthesisStage<L> {
    pub fn new(llm: Arc<L>) -> Self {
        Self { llm }
    }

    /// Merge, check, hook, and assemble one chapter.
    pub async fn integrate(
        &self,
        request: &SynthesisRequest<'_>,
    ) -> Result<SynthesisOutput, SynthesisError> {
        let started = Instant::now();
        tracing::info!(
            chapter = request.chapter_number,
            title = %request.chapter_title,
            "synthesis stage integrating specialist outputs"
        );

        let (mappings, mut conflicts) =
            merge_slot_maps(request.character_slots, request.scene_slots);
        conflicts.extend(detect_conflicts(&mappings));
        for conflict in &conflicts {
            tracing::warn!(kind = ?conflict.kind, description = %conflict.description, "conflict detected");
        }

        let hooks = self.generate_hooks(&mappings, request).await;

        let (mut content, unresolved) = match self.assisted_assembly(request, &mappings, &hooks).await
        {
            Ok(assembled) => {
                let unresolved = unresolved_markers(&assembled);
                (assembled, unresolved)
            }
            Err(e) => {
                tracing::warn!(error = %e, "assisted assembly failed, falling back to literal substitution");
                let (assembled, unresolved) =
                    substitute_markers(request.framework.prose(), &mappings);
                (assembled, unresolved)
            }
        };

        for slot_id in &unresolved {
            tracing::warn!(slot = %slot_id, "slot marker left unresolved in assembled chapter");
        }

        if let Some(hook) = hooks.first() {
            if !ends_with_any(&content, &hooks) {
                content = format!("{}\n\n{}", content.trim_end(), hook);
            }
        }

        if content.trim().is_empty() {
            return Err(SynthesisError::EmptyMerge);
        }

        let confidence = calculate_confidence(mappings.len(), conflicts.len());
        let metadata = AgentMetadata {
            kind: AgentKind::Synthesis,
            elapsed_ms: started.elapsed().as_millis() as u64,
            confidence,
            notes: vec![
                format!("integrated {} slots from specialist outputs", mappings.len()),
                format!("detected {} conflicts", conflicts.len()),
                format!("{} unresolved markers", unresolved.len()),
            ],
        };

        Ok(SynthesisOutput {
            integrated_chapter: content,
            hooks_added: hooks,
            conflicts,
            unresolved_slots: unresolved,
            confidence,
            metadata,
        })
    }

    /// One short generation producing 3-5 cliffhanger candidates.
    ///
    /// Degrades to the static transition pool on failure or empty parse.
    async fn generate_hooks(
        &self,
        mappings: &BTreeMap<String, SlotMapping>,
        request: &SynthesisRequest<'_>,
    ) -> Vec<String> {
        let system_prompt = "You are an expert at chapter endings. Your only job is to write \
                             cliffhanger hooks that make the reader open the next chapter. Each \
                             hook is one short, tense sentence: a sudden threat, a reversal, an \
                             unanswered question, an unexpected discovery. Do not reveal too \
                             much. No numbering, no commentary - one hook per line."
            .to_string();

        let user_prompt = format!(
            "Write 3-5 cliffhanger hooks for Chapter {} \"{}\".\n\n\
             **Chapter content digest:**\n{}\n\n\
             Each hook must be a self-contained closing sentence of 10-100 characters, \
             one per line:",
            request.chapter_number,
            request.chapter_title,
            content_digest(mappings),
        );

        let llm_request = LlmRequest::new(vec![ChatMessage::user(user_prompt)])
            .with_system_prompt(system_prompt)
            .with_temperature(0.7)
            .with_top_p(0.8)
            .with_top_k(30)
            .with_max_tokens(Some(400));

        match self.llm.generate(llm_request).await {
            Ok(response) => {
                let hooks = parse_hooks(&response.content);
                if hooks.is_empty() {
                    tracing::warn!("hook generation returned nothing usable, using static pool");
                    static_transitions()
                } else {
                    hooks
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "hook generation failed, using static pool");
                static_transitions()
            }
        }
    }

    /// The assisted low-temperature assembly pass.
    ///
    /// Instructed to substitute markers and smooth seams only; inventing
    /// plot or dialogue is out of bounds.
    async fn assisted_assembly(
        &self,
        request: &SynthesisRequest<'_>,
        mappings: &BTreeMap<String, SlotMapping>,
        hooks: &[String],
    ) -> Result<String, crate::application::ports::outbound::ProviderError> {
        let system_prompt = "You are a text integration specialist. Your only job is to:\n\
                             1. Replace each [SLOT] marker with the content provided for it\n\
                             2. Add minimal connective tissue where seams feel abrupt\n\
                             3. Keep the result natural and readable\n\n\
                             Do not rewrite or modify the provided content. Do not add new plot \
                             elements, dialogue, or description. Do not change tone or style. \
                             Only substitute, connect, and punctuate."
            .to_string();

        let slot_block = mappings
            .values()
            .map(|m| format!("[{}]: {}", m.slot_id, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let user_prompt = format!(
            "Integrate the following chapter.\n\n\
             **Skeleton:**\n{}\n\n\
             **Slot content:**\n{}\n\n\
             **Available hooks (for the very end only):**\n{}\n\n\
             **Integration rules:**\n\
             1. Replace every [SLOT] marker with its matching content\n\
             2. Where content feels disjointed, use a short connective (\"a moment later\", \
             \"meanwhile\")\n\
             3. Choose the single best hook and place it at the very end of the chapter\n\
             4. Keep natural paragraph breaks\n\
             5. Preserve all specialist content exactly\n\n\
             Output the integrated chapter now:",
            request.framework.prose(),
            slot_block,
            hooks.join("\n"),
        );

        let llm_request = LlmRequest::new(vec![ChatMessage::user(user_prompt)])
            .with_system_prompt(system_prompt)
            .with_temperature(0.3)
            .with_top_p(0.7)
            .with_top_k(20);

        let response = self.llm.generate(llm_request).await?;
        Ok(response.content.trim().to_string())
    }
}

/// Build the unified mapping set from both specialist maps.
///
/// Duplicate ids are resolved in favor of the owning specialist, then by
/// fixed priority; every foreign-category emission is recorded as a content
/// conflict. Resolution is total and deterministic regardless of map
/// iteration order.
pub(crate) fn merge_slot_maps(
    character_slots: &SlotContentMap,
    scene_slots: &SlotContentMap,
) -> (BTreeMap<String, SlotMapping>, Vec<ConflictRecord>) {
    let mut mappings: BTreeMap<String, SlotMapping> = BTreeMap::new();
    let mut conflicts = Vec::new();

    let sources = [
        (AgentSource::Character, character_slots),
        (AgentSource::Scene, scene_slots),
    ];

    for (source, slots) in sources {
        for (slot_id, content) in slots.iter() {
            let category = Slot::parse(slot_id).map(|s| s.category);
            let is_owner = category.map(|c| source.owns(c)).unwrap_or(false);

            if category.is_some() && !is_owner {
                conflicts.push(ConflictRecord::new(
                    ConflictKind::Content,
                    format!(
                        "{:?} agent emitted content for foreign slot [{}]",
                        source, slot_id
                    ),
                    "priority override only - the owning agent's record wins".to_string(),
                ));
            }

            let candidate = SlotMapping::new(slot_id.clone(), content.clone(), source);
            match mappings.get(slot_id) {
                None => {
                    mappings.insert(slot_id.clone(), candidate);
                }
                Some(existing) => {
                    let existing_owner = category
                        .map(|c| existing.source.owns(c))
                        .unwrap_or(false);
                    let replace = match (is_owner, existing_owner) {
                        (true, false) => true,
                        (false, true) => false,
                        _ => candidate.priority > existing.priority,
                    };
                    conflicts.push(ConflictRecord::new(
                        ConflictKind::Content,
                        format!("two agents emitted content for slot [{}]", slot_id),
                        format!(
                            "kept the {:?} record by ownership/priority",
                            if replace { candidate.source } else { existing.source }
                        ),
                    ));
                    if replace {
                        mappings.insert(slot_id.clone(), candidate);
                    }
                }
            }
        }
    }

    (mappings, conflicts)
}

/// Run the independent conflict checkers. Detection only - no checker
/// mutates content.
pub(crate) fn detect_conflicts(mappings: &BTreeMap<String, SlotMapping>) -> Vec<ConflictRecord> {
    let mut conflicts = Vec::new();
    conflicts.extend(detect_tone_drift(mappings));
    conflicts.extend(detect_pacing_mismatch(mappings));
    conflicts.extend(detect_content_contradiction(mappings));
    conflicts.extend(detect_power_scaling(mappings));
    conflicts.extend(detect_system_logic(mappings));
    conflicts
}

fn detect_tone_drift(mappings: &BTreeMap<String, SlotMapping>) -> Vec<ConflictRecord> {
    let mut grim = None;
    let mut light = None;
    for mapping in mappings.values() {
        let lower = mapping.content.to_lowercase();
        if grim.is_none() && GRIM_WORDS.iter().any(|w| lower.contains(w)) {
            grim = Some(mapping.slot_id.clone());
        }
        if light.is_none() && LIGHT_WORDS.iter().any(|w| lower.contains(w)) {
            light = Some(mapping.slot_id.clone());
        }
    }
    match (grim, light) {
        (Some(g), Some(l)) => vec![ConflictRecord::new(
            ConflictKind::Tone,
            format!("grim register in [{}] clashes with light register in [{}]", g, l),
            "flagged for review; priority override only",
        )],
        _ => Vec::new(),
    }
}

fn detect_pacing_mismatch(mappings: &BTreeMap<String, SlotMapping>) -> Vec<ConflictRecord> {
    let mut conflicts = Vec::new();
    for mapping in mappings.values() {
        if !mapping.slot_id.starts_with("ACTION_") {
            continue;
        }
        let sentences: Vec<&str> = mapping
            .content
            .split(['.', '!', '?'])
            .filter(|s| !s.trim().is_empty())
            .collect();
        if sentences.is_empty() {
            continue;
        }
        let total_words: usize = sentences
            .iter()
            .map(|s| s.split_whitespace().count())
            .sum();
        if total_words / sentences.len() > ACTION_PACE_WORDS {
            conflicts.push(ConflictRecord::new(
                ConflictKind::Pacing,
                format!(
                    "action slot [{}] averages {} words per sentence",
                    mapping.slot_id,
                    total_words / sentences.len()
                ),
                "flagged for review; priority override only",
            ));
        }
    }
    conflicts
}

fn detect_content_contradiction(mappings: &BTreeMap<String, SlotMapping>) -> Vec<ConflictRecord> {
    let mut morning = None;
    let mut night = None;
    for mapping in mappings.values() {
        let lower = mapping.content.to_lowercase();
        if morning.is_none() && MORNING_WORDS.iter().any(|w| lower.contains(w)) {
            morning = Some(mapping.slot_id.clone());
        }
        if night.is_none() && NIGHT_WORDS.iter().any(|w| lower.contains(w)) {
            night = Some(mapping.slot_id.clone());
        }
    }
    match (morning, night) {
        (Some(m), Some(n)) if m != n => vec![ConflictRecord::new(
            ConflictKind::Content,
            format!("[{}] places the scene in the morning while [{}] places it at night", m, n),
            "flagged for review; priority override only",
        )],
        _ => Vec::new(),
    }
}

fn detect_power_scaling(mappings: &BTreeMap<String, SlotMapping>) -> Vec<ConflictRecord> {
    let joined = mappings
        .values()
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let has_low = LOW_TIER_WORDS.iter().any(|w| joined.contains(w));
    let has_apex = APEX_TIER_WORDS.iter().any(|w| joined.contains(w));
    if has_low && has_apex {
        vec![ConflictRecord::new(
            ConflictKind::PowerScaling,
            "low-tier and apex-tier power vocabulary appear in the same chapter",
            "verify the escalation is earned; no automatic correction is applied",
        )]
    } else {
        Vec::new()
    }
}

fn detect_system_logic(mappings: &BTreeMap<String, SlotMapping>) -> Vec<ConflictRecord> {
    let joined = mappings
        .values()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    let mut conflicts = Vec::new();
    for re in SYSTEM_REWARD_RES.iter() {
        if let Some(found) = re.find(&joined) {
            conflicts.push(ConflictRecord::new(
                ConflictKind::SystemLogic,
                format!(
                    "reward grant detected: \"{}\" - confirm it matches established world rules",
                    found.as_str()
                ),
                "verify reward consistency; no automatic correction is applied",
            ));
        }
    }
    conflicts
}

/// Deterministic literal marker substitution, ordered by priority then id.
///
/// Markers without content stay visible in the output and are returned as
/// unresolved - they are never deleted. Running this over marker-free text
/// returns the text unchanged.
pub(crate) fn substitute_markers(
    template: &str,
    mappings: &BTreeMap<String, SlotMapping>,
) -> (String, Vec<String>) {
    let mut ordered: Vec<&SlotMapping> = mappings.values().collect();
    ordered.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.slot_id.cmp(&b.slot_id))
    });

    let mut integrated = template.to_string();
    for mapping in ordered {
        let marker = format!("[{}]", mapping.slot_id);
        if integrated.contains(&marker) {
            integrated = integrated.replace(&marker, &mapping.content);
            tracing::debug!(slot = %mapping.slot_id, source = ?mapping.source, "slot filled");
        }
    }

    let unresolved = unresolved_markers(&integrated);
    (integrated, unresolved)
}

/// Known-category markers still present in assembled text.
fn unresolved_markers(text: &str) -> Vec<String> {
    let mut unresolved = Vec::new();
    for caps in MARKER_RE.captures_iter(text) {
        let id = caps[1].to_string();
        if Slot::parse(&id).is_some() && !unresolved.contains(&id) {
            unresolved.push(id);
        }
    }
    unresolved
}

fn content_digest(mappings: &BTreeMap<String, SlotMapping>) -> String {
    mappings
        .values()
        .take(5)
        .map(|m| {
            let preview: String = m.content.chars().take(100).collect();
            format!("{}: {}...", m.slot_id, preview)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accept candidate lines of 10-100 characters, at most five.
fn parse_hooks(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| {
                    c.is_ascii_digit() || matches!(c, '.' | ')' | '-' | '*' | ' ')
                })
                .trim_matches('"')
                .trim()
                .to_string()
        })
        .filter(|line| {
            let len = line.chars().count();
            (10..=100).contains(&len)
        })
        .take(5)
        .collect()
}

fn static_transitions() -> Vec<String> {
    STATIC_TRANSITIONS.iter().map(|s| s.to_string()).collect()
}

fn ends_with_any(text: &str, hooks: &[String]) -> bool {
    let trimmed = text.trim_end();
    hooks.iter().any(|h| trimmed.ends_with(h.as_str()))
}

/// Base 90, -5 per conflict, +2 per slot capped at +10, clamped to [60, 100].
fn calculate_confidence(slot_count: usize, conflict_count: usize) -> u8 {
    let base: i32 = 90;
    let penalty = conflict_count as i32 * 5;
    let bonus = (slot_count as i32 * 2).min(10);
    (base - penalty + bonus).clamp(60, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::outbound::{LlmResponse, ProviderError};
    use async_trait::async_trait;

    /// Provider that always fails: exercises every deterministic fallback.
    struct DownLlm;

    #[async_trait]
    impl LlmPort for DownLlm {
        async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, ProviderError> {
            Err(ProviderError::Unavailable("down".to_string()))
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Err(ProviderError::Unavailable("down".to_string()))
        }
    }

    fn framework() -> StructureFramework {
        StructureFramework::parse("她推门而入。[DESCRIPTION_A] 他看着她。[DIALOGUE_B]").unwrap()
    }

    fn character_map() -> SlotContentMap {
        let mut map = SlotContentMap::new();
        map.insert("DIALOGUE_B".to_string(), "\"你来了。\"".to_string());
        map
    }

    fn scene_map() -> SlotContentMap {
        let mut map = SlotContentMap::new();
        map.insert("DESCRIPTION_A".to_string(), "屋内弥漫着霉味。".to_string());
        map
    }

    #[tokio::test]
    async fn test_fallback_integration_substitutes_and_appends_one_hook() {
        let stage = SynthesisStage::new(Arc::new(DownLlm));
        let fw = framework();
        let character = character_map();
        let scene = scene_map();

        let output = stage
            .integrate(&SynthesisRequest {
                framework: &fw,
                character_slots: &character,
                scene_slots: &scene,
                chapter_number: 2,
                chapter_title: "重逢",
            })
            .await
            .unwrap();

        assert!(output.integrated_chapter.contains("屋内弥漫着霉味。"));
        assert!(output.integrated_chapter.contains("\"你来了。\""));
        assert!(!output.integrated_chapter.contains('['));
        assert!(output.unresolved_slots.is_empty());
        // Exactly one appended hook: the text ends with the first static
        // transition and contains it exactly once.
        let hook = &output.hooks_added[0];
        assert!(output.integrated_chapter.trim_end().ends_with(hook.as_str()));
        assert_eq!(output.integrated_chapter.matches(hook.as_str()).count(), 1);
    }

    #[tokio::test]
    async fn test_missing_specialist_content_leaves_marker_visible() {
        let stage = SynthesisStage::new(Arc::new(DownLlm));
        let fw = framework();
        let character = SlotContentMap::new(); // simulated parse failure
        let scene = scene_map();

        let output = stage
            .integrate(&SynthesisRequest {
                framework: &fw,
                character_slots: &character,
                scene_slots: &scene,
                chapter_number: 2,
                chapter_title: "重逢",
            })
            .await
            .unwrap();

        assert!(output.integrated_chapter.contains("[DIALOGUE_B]"));
        assert_eq!(output.unresolved_slots, vec!["DIALOGUE_B".to_string()]);
    }

    #[tokio::test]
    async fn test_merge_is_deterministic() {
        let stage = SynthesisStage::new(Arc::new(DownLlm));
        let fw = framework();
        let character = character_map();
        let scene = scene_map();

        let request = SynthesisRequest {
            framework: &fw,
            character_slots: &character,
            scene_slots: &scene,
            chapter_number: 2,
            chapter_title: "重逢",
        };

        let first = stage.integrate(&request).await.unwrap();
        let second = stage.integrate(&request).await.unwrap();
        assert_eq!(first.integrated_chapter, second.integrated_chapter);
    }

    #[test]
    fn test_substitution_is_idempotent_on_clean_text() {
        let (mappings, _) = merge_slot_maps(&character_map(), &scene_map());
        let clean = "A chapter with no markers left in it.";
        let (output, unresolved) = substitute_markers(clean, &mappings);
        assert_eq!(output, clean);
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_duplicate_id_resolved_for_owner() {
        let mut character = SlotContentMap::new();
        character.insert("DESCRIPTION_A".to_string(), "character version".to_string());
        let mut scene = SlotContentMap::new();
        scene.insert("DESCRIPTION_A".to_string(), "scene version".to_string());

        let (mappings, conflicts) = merge_slot_maps(&character, &scene);
        // Scene owns DESCRIPTION even though character has higher priority.
        assert_eq!(mappings["DESCRIPTION_A"].content, "scene version");
        assert_eq!(mappings["DESCRIPTION_A"].source, AgentSource::Scene);
        // Foreign emission and duplicate are both recorded.
        assert!(conflicts.len() >= 2);
    }

    #[test]
    fn test_foreign_slot_emission_logged_as_conflict() {
        let mut character = SlotContentMap::new();
        character.insert("ACTION_X".to_string(), "character wrote action".to_string());
        let scene = SlotContentMap::new();

        let (mappings, conflicts) = merge_slot_maps(&character, &scene);
        assert!(mappings.contains_key("ACTION_X"));
        assert!(conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::Content && c.description.contains("foreign")));
    }

    #[test]
    fn test_power_scaling_detection() {
        let mut map = BTreeMap::new();
        map.insert(
            "DIALOGUE_A".to_string(),
            SlotMapping::new(
                "DIALOGUE_A",
                "A mere novice could never face a transcendent elder.",
                AgentSource::Character,
            ),
        );
        let conflicts = detect_power_scaling(&map);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::PowerScaling);
    }

    #[test]
    fn test_system_logic_detection() {
        let mut map = BTreeMap::new();
        map.insert(
            "INTERNAL_A".to_string(),
            SlotMapping::new(
                "INTERNAL_A",
                "Congratulations, host! The system reward has been issued.",
                AgentSource::Character,
            ),
        );
        let conflicts = detect_system_logic(&map);
        assert!(!conflicts.is_empty());
        assert_eq!(conflicts[0].kind, ConflictKind::SystemLogic);
    }

    #[test]
    fn test_tone_drift_detection() {
        let mut map = BTreeMap::new();
        map.insert(
            "DESCRIPTION_A".to_string(),
            SlotMapping::new("DESCRIPTION_A", "Blood pooled under the door.", AgentSource::Scene),
        );
        map.insert(
            "DIALOGUE_B".to_string(),
            SlotMapping::new(
                "DIALOGUE_B",
                "He grinned and told a joke about the weather.",
                AgentSource::Character,
            ),
        );
        let conflicts = detect_tone_drift(&map);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::Tone);
    }

    #[test]
    fn test_hook_parsing_bounds() {
        let hooks = parse_hooks(
            "1. And then the lights went out across the whole district.\n\
             too short\n\
             2. \"Behind you,\" said a voice she had buried years ago.\n",
        );
        assert_eq!(hooks.len(), 2);
        assert!(hooks[0].starts_with("And then"));
    }

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(calculate_confidence(0, 0), 90);
        assert_eq!(calculate_confidence(10, 0), 100);
        assert_eq!(calculate_confidence(0, 20), 60);
    }
}
