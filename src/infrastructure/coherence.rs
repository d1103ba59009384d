//! In-memory coherence store - Reference implementation of the store port
//!
//! Keeps cross-chapter state in process memory: committed chapter
//! summaries, character profiles, and simple balance statistics. Suitable
//! for single-story runs and tests; the port contract allows swapping in a
//! persistent implementation without touching the pipeline.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::application::ports::outbound::{
    BalanceIssue, BalanceIssueKind, BalanceReport, ChapterContext, CharacterContext,
    CharacterState, CoherenceConstraints, CoherenceError, CoherenceStorePort, LimitAction,
    LimitCheck, LocationContext, RepetitionIssue, RepetitionReport, RepetitionSeverity,
    SceneContext, StructureContext, ToneGuidance,
};
use crate::domain::entities::ChapterRecord;
use crate::domain::value_objects::{ChapterPlan, CharacterProfile};

/// Overused phrases scanned for during repetition checks, keyed by the
/// substitution-table category.
const REPETITION_WATCHLIST: [(&str, &str); 7] = [
    ("heart skipped a beat", "metaphors"),
    ("her heart clenched", "metaphors"),
    ("a chill ran down her spine", "metaphors"),
    ("deafening silence", "sensory"),
    ("the air was thick", "sensory"),
    ("fear gripped", "emotional"),
    ("panic rose", "emotional"),
];

/// Character-stage output above this many characters trips the limit check.
const CHARACTER_CONTENT_LIMIT: usize = 6000;

/// A quote-free paragraph above this length counts as a monologue block.
const MONOLOGUE_PARAGRAPH_CHARS: usize = 600;

#[derive(Debug, Clone)]
struct CommittedChapter {
    title: String,
    summary: String,
    tail: String,
    description_heavy: bool,
    consecutive_description: bool,
}

#[derive(Debug, Default)]
struct StoreState {
    outline: String,
    characters: Vec<CharacterProfile>,
    chapter_count: u32,
    chapters: BTreeMap<u32, CommittedChapter>,
}

/// Process-local coherence store
#[derive(Default)]
pub struct InMemoryCoherenceStore {
    inner: Mutex<StoreState>,
}

impl InMemoryCoherenceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed chapters.
    pub fn committed_chapters(&self) -> usize {
        self.inner.lock().expect("store lock").chapters.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.inner.lock().expect("store lock")
    }
}

fn chapter_role(chapter_number: u32, chapter_count: u32) -> &'static str {
    if chapter_number <= 1 {
        "opening"
    } else if chapter_number >= chapter_count {
        "closing"
    } else if chapter_number * 10 >= chapter_count * 7 {
        "climactic"
    } else if chapter_number * 10 <= chapter_count * 3 {
        "early rising"
    } else {
        "middle development"
    }
}

fn tempo_for(plan: &ChapterPlan) -> &'static str {
    match plan.tension_level.unwrap_or(5) {
        0..=3 => "slow",
        4..=6 => "moderate",
        _ => "fast",
    }
}

fn is_long_quote_free(paragraph: &str) -> bool {
    paragraph.chars().count() > MONOLOGUE_PARAGRAPH_CHARS
        && !paragraph.contains('"')
        && !paragraph.contains('\u{201c}')
}

fn tail_of(text: &str, n: usize) -> String {
    let count = text.chars().count();
    if count <= n {
        return text.to_string();
    }
    text.chars().skip(count - n).collect()
}

#[async_trait]
impl CoherenceStorePort for InMemoryCoherenceStore {
    async fn initialize_from_outline(
        &self,
        outline: &str,
        characters: &[CharacterProfile],
        chapter_count: u32,
    ) -> Result<(), CoherenceError> {
        let mut state = self.lock();
        state.outline = outline.to_string();
        state.characters = characters.to_vec();
        state.chapter_count = chapter_count;
        state.chapters.clear();
        tracing::info!(
            characters = characters.len(),
            chapter_count,
            "coherence store initialized from outline"
        );
        Ok(())
    }

    async fn prepare_chapter_context(
        &self,
        chapter_number: u32,
        plan: &ChapterPlan,
    ) -> Result<ChapterContext, CoherenceError> {
        let state = self.lock();
        let chapter_count = state.chapter_count.max(1);

        let plot_threads = plan
            .plot_advancement
            .clone()
            .map(|t| vec![t])
            .unwrap_or_else(|| vec!["advance the central conflict".to_string()]);

        let structure = StructureContext {
            chapter_role: chapter_role(chapter_number, chapter_count).to_string(),
            tempo: tempo_for(plan).to_string(),
            tension_level: plan.tension_level.unwrap_or(5),
            plot_threads_to_advance: plot_threads.clone(),
        };

        let character_states: BTreeMap<String, CharacterState> = state
            .characters
            .iter()
            .map(|profile| {
                (
                    profile.name.clone(),
                    CharacterState {
                        location: profile.location.clone(),
                        primary_emotion: profile.emotional_state.clone(),
                    },
                )
            })
            .collect();
        let character = CharacterContext {
            active_characters: state.characters.iter().map(|c| c.name.clone()).collect(),
            character_states,
        };

        let scene = SceneContext {
            primary_location: LocationContext {
                name: plan
                    .primary_location
                    .clone()
                    .unwrap_or_else(|| "unspecified location".to_string()),
                description: String::new(),
                security_level: "neutral".to_string(),
            },
            mood: plan
                .emotional_tone
                .clone()
                .unwrap_or_else(|| "neutral".to_string()),
            tension: plan.tension_level.unwrap_or(5).to_string(),
            sensory_focus: vec!["sight".to_string(), "sound".to_string()],
        };

        let established_facts: Vec<String> = state
            .chapters
            .iter()
            .map(|(number, chapter)| {
                format!("Chapter {} \"{}\": {}", number, chapter.title, chapter.summary)
            })
            .collect();
        let relationships: Vec<String> = state
            .characters
            .iter()
            .flat_map(|profile| {
                profile
                    .relationships
                    .iter()
                    .map(move |(other, relation)| {
                        format!("{} - {}: {}", profile.name, other, relation)
                    })
            })
            .collect();

        let constraints = CoherenceConstraints {
            established_facts,
            relationships,
            world_rules: Vec::new(),
            plot_threads,
        };

        Ok(ChapterContext {
            structure,
            character,
            scene,
            constraints,
        })
    }

    async fn update_from_generated_chapter(
        &self,
        chapter: &ChapterRecord,
        chapter_number: u32,
    ) -> Result<(), CoherenceError> {
        let paragraphs: Vec<&str> = chapter.content.split("\n\n").collect();
        let long_runs = paragraphs.iter().filter(|p| is_long_quote_free(p)).count();
        let description_heavy = paragraphs.len() >= 2 && long_runs * 2 > paragraphs.len();
        let consecutive_description = paragraphs
            .windows(2)
            .any(|pair| is_long_quote_free(pair[0]) && is_long_quote_free(pair[1]));

        let mut state = self.lock();
        state.chapters.insert(
            chapter_number,
            CommittedChapter {
                title: chapter.title.clone(),
                summary: chapter.summary.clone(),
                tail: tail_of(&chapter.content, 200),
                description_heavy,
                consecutive_description,
            },
        );
        tracing::info!(chapter = chapter_number, "chapter committed to coherence store");
        Ok(())
    }

    async fn check_for_repetition(
        &self,
        text: &str,
        chapter_number: u32,
    ) -> Result<RepetitionReport, CoherenceError> {
        let lower = text.to_lowercase();
        let mut issues = Vec::new();
        let mut total = 0usize;

        for (phrase, category) in REPETITION_WATCHLIST {
            let count = lower.match_indices(phrase).count();
            if count < 2 {
                continue;
            }
            total += count - 1;
            let severity = match count {
                2 => RepetitionSeverity::Low,
                3 => RepetitionSeverity::Medium,
                _ => RepetitionSeverity::High,
            };
            issues.push(RepetitionIssue {
                phrase: phrase.to_string(),
                count,
                severity,
                category: category.to_string(),
            });
        }

        let severity = issues
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(RepetitionSeverity::Low);

        if !issues.is_empty() {
            tracing::debug!(
                chapter = chapter_number,
                issues = issues.len(),
                "repetition found in chapter text"
            );
        }

        Ok(RepetitionReport {
            total_repetitions: total,
            severity,
            issues,
        })
    }

    async fn validate_chapter_balance(&self) -> Result<BalanceReport, CoherenceError> {
        let state = self.lock();
        let mut issues = Vec::new();

        if let Some((number, last)) = state.chapters.iter().next_back() {
            if last.description_heavy {
                issues.push(BalanceIssue {
                    kind: BalanceIssueKind::DescriptionOverload,
                    detail: format!("chapter {} leaned heavily on description", number),
                });
            }
            if last.consecutive_description {
                issues.push(BalanceIssue {
                    kind: BalanceIssueKind::ConsecutiveDescription,
                    detail: format!("chapter {} ran consecutive description blocks", number),
                });
            }
        }

        Ok(BalanceReport { issues })
    }

    async fn check_content_limits(
        &self,
        kind: &str,
        text: &str,
    ) -> Result<LimitCheck, CoherenceError> {
        if kind != "character" {
            return Ok(LimitCheck::ok());
        }

        if text.chars().count() > CHARACTER_CONTENT_LIMIT {
            return Ok(LimitCheck {
                allowed: false,
                reason: Some(format!(
                    "character content exceeds {} characters",
                    CHARACTER_CONTENT_LIMIT
                )),
                suggested_action: Some(LimitAction::CondenseInternal),
            });
        }

        if text.split("\n\n").any(is_long_quote_free) {
            return Ok(LimitCheck {
                allowed: false,
                reason: Some("interior monologue block runs too long unbroken".to_string()),
                suggested_action: Some(LimitAction::AddMicroAction),
            });
        }

        Ok(LimitCheck::ok())
    }

    async fn tone_guidance_for_scene(&self) -> Result<ToneGuidance, CoherenceError> {
        let state = self.lock();
        let tense = state
            .chapters
            .iter()
            .next_back()
            .map(|(_, chapter)| {
                let tail = chapter.tail.to_lowercase();
                ["blood", "dread", "scream", "knife", "dead"]
                    .iter()
                    .any(|w| tail.contains(w))
            })
            .unwrap_or(false);

        Ok(if tense {
            ToneGuidance {
                current_tone: "tense".to_string(),
                description_length: "short".to_string(),
                sentence_style: "clipped".to_string(),
            }
        } else {
            ToneGuidance {
                current_tone: "neutral".to_string(),
                description_length: "medium".to_string(),
                sentence_style: "varied".to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> ChapterPlan {
        ChapterPlan {
            title: "Test".to_string(),
            summary: "Summary.".to_string(),
            tension_level: Some(8),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_context_reflects_committed_chapters() {
        let store = InMemoryCoherenceStore::new();
        store
            .initialize_from_outline("outline", &[], 10)
            .await
            .unwrap();

        let record = ChapterRecord::new("One", "Content.", "plan", "First summary.");
        store.update_from_generated_chapter(&record, 1).await.unwrap();

        let context = store.prepare_chapter_context(2, &plan()).await.unwrap();
        assert_eq!(context.structure.chapter_role, "early rising");
        assert_eq!(context.structure.tempo, "fast");
        assert_eq!(context.constraints.established_facts.len(), 1);
        assert!(context.constraints.established_facts[0].contains("First summary."));
    }

    #[tokio::test]
    async fn test_repetition_scan_counts_watchlist_phrases() {
        let store = InMemoryCoherenceStore::new();
        let text = "Her heart skipped a beat. Then her heart skipped a beat. \
                    And again her heart skipped a beat, and once more her heart skipped a beat.";

        let report = store.check_for_repetition(text, 1).await.unwrap();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].count, 4);
        assert_eq!(report.issues[0].severity, RepetitionSeverity::High);
        assert_eq!(report.total_repetitions, 3);
    }

    #[tokio::test]
    async fn test_content_limits_flag_oversized_character_output() {
        let store = InMemoryCoherenceStore::new();

        let oversized = "x".repeat(CHARACTER_CONTENT_LIMIT + 1);
        let check = store.check_content_limits("character", &oversized).await.unwrap();
        assert!(!check.allowed);
        assert_eq!(check.suggested_action, Some(LimitAction::CondenseInternal));

        let monologue = "a thought ".repeat(80);
        let check = store.check_content_limits("character", &monologue).await.unwrap();
        assert_eq!(check.suggested_action, Some(LimitAction::AddMicroAction));

        let check = store.check_content_limits("scene", &oversized).await.unwrap();
        assert!(check.allowed);
    }

    #[tokio::test]
    async fn test_balance_report_follows_last_committed_chapter() {
        let store = InMemoryCoherenceStore::new();
        assert!(store.validate_chapter_balance().await.unwrap().issues.is_empty());

        let long_block = "Only description without any dialogue at all. ".repeat(20);
        let content = format!("{}\n\n{}", long_block.trim(), long_block.trim());
        let record = ChapterRecord::new("One", content, "plan", "summary");
        store.update_from_generated_chapter(&record, 1).await.unwrap();

        let report = store.validate_chapter_balance().await.unwrap();
        let kinds: Vec<BalanceIssueKind> = report.issues.iter().map(|i| i.kind).collect();
        assert!(kinds.contains(&BalanceIssueKind::DescriptionOverload));
        assert!(kinds.contains(&BalanceIssueKind::ConsecutiveDescription));
    }
}
