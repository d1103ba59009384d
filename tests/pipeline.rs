//! End-to-end pipeline tests with a scripted provider and the in-memory store

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chapterforge::application::dto::{AgentKind, ChapterGenerationRequest, GenerationConfig};
use chapterforge::application::ports::outbound::{
    LlmPort, LlmRequest, LlmResponse, ProviderError,
};
use chapterforge::application::services::ChapterPipeline;
use chapterforge::domain::value_objects::{ChapterPlan, CharacterProfile};
use chapterforge::infrastructure::InMemoryCoherenceStore;

/// Provider that replays a scripted sequence of outcomes.
struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
}

impl ScriptedLlm {
    fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn generate(&self, _request: LlmRequest) -> Result<LlmResponse, ProviderError> {
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ProviderError::Unavailable("script exhausted".to_string())));
        next.map(|content| LlmResponse {
            content,
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn request() -> ChapterGenerationRequest {
    ChapterGenerationRequest {
        chapter_number: 1,
        plan: ChapterPlan {
            title: "重逢".to_string(),
            summary: "A reunion that should not have happened.".to_string(),
            tension_level: Some(6),
            ..Default::default()
        },
        characters: vec![CharacterProfile {
            name: "Delilah".to_string(),
            location: "the tavern".to_string(),
            emotional_state: "wary".to_string(),
            ..Default::default()
        }],
        previous_chapter_end: None,
        story_outline: "Two former partners cross paths during an audit gone wrong.".to_string(),
        target_length: 4000,
        genre: None,
    }
}

fn config() -> GenerationConfig {
    GenerationConfig {
        enable_light_polish: false,
        ..Default::default()
    }
}

const SKELETON: &str = "她推门而入。[DESCRIPTION_A] 他看着她。[DIALOGUE_B]\n\n寒意蔓延。[INTERNAL_C]";

#[tokio::test]
async fn test_full_pipeline_with_degraded_synthesis() {
    // Structure, character, and scene succeed; the hook and assembly calls
    // fail, so synthesis takes both deterministic fallbacks.
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok(SKELETON.to_string()),
        Ok("[DIALOGUE_B]: \"你来了。\"\n\n[INTERNAL_C]: 她的心沉了下去。不对劲。".to_string()),
        Ok("[DESCRIPTION_A]: 屋内弥漫着霉味。".to_string()),
        Err(ProviderError::Unavailable("hook call down".to_string())),
        Err(ProviderError::Unavailable("assembly call down".to_string())),
    ]));
    let store = Arc::new(InMemoryCoherenceStore::new());
    let pipeline = ChapterPipeline::new(llm, store.clone(), config());

    let result = pipeline.generate_chapter(&request()).await;

    assert!(result.success);
    assert!(result.chapter.content.contains("屋内弥漫着霉味。"));
    assert!(result.chapter.content.contains("你来了。"));
    assert!(!result.chapter.content.contains('['));

    let names: Vec<&str> = result.phases.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "context-preparation",
            "specialist-generation",
            "synthesis-validation",
            "repetition-check",
            "coherence-commit",
        ]
    );
    assert!(result.phases.iter().all(|p| p.success));

    // All four agents reported timing.
    for kind in [
        AgentKind::Structure,
        AgentKind::Character,
        AgentKind::Scene,
        AgentKind::Synthesis,
    ] {
        assert!(result.metadata.agent_timing.contains_key(&kind));
    }

    // Exactly one commit reached the store.
    assert_eq!(store.committed_chapters(), 1);
}

#[tokio::test]
async fn test_missing_character_content_surfaces_unresolved_warnings() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok(SKELETON.to_string()),
        Ok("I cannot produce slot content right now.".to_string()),
        Ok("[DESCRIPTION_A]: 屋内弥漫着霉味。".to_string()),
        Err(ProviderError::Unavailable("hook call down".to_string())),
        Err(ProviderError::Unavailable("assembly call down".to_string())),
    ]));
    let store = Arc::new(InMemoryCoherenceStore::new());
    let pipeline = ChapterPipeline::new(llm, store, config());

    let result = pipeline.generate_chapter(&request()).await;

    // The run still succeeds; the unfilled markers stay visible.
    assert!(result.success);
    assert!(result.chapter.content.contains("[DIALOGUE_B]"));
    assert!(result.chapter.content.contains("[INTERNAL_C]"));

    let synthesis = result
        .phases
        .iter()
        .find(|p| p.name == "synthesis-validation")
        .unwrap();
    let unresolved: Vec<&String> = synthesis
        .warnings
        .iter()
        .filter(|w| w.contains("unresolved slot"))
        .collect();
    assert_eq!(unresolved.len(), 2);
    assert!(unresolved.iter().any(|w| w.contains("[DIALOGUE_B]")));
}

#[tokio::test]
async fn test_fatal_structure_failure_returns_failure_result_after_retry() {
    // Both the first attempt and the single whole-pipeline retry fail at
    // the structure stage.
    let llm = Arc::new(ScriptedLlm::new(vec![
        Err(ProviderError::Auth),
        Err(ProviderError::Auth),
    ]));
    let store = Arc::new(InMemoryCoherenceStore::new());
    let pipeline = ChapterPipeline::new(llm, store.clone(), config());

    let result = pipeline.generate_chapter(&request()).await;

    assert!(!result.success);
    assert!(result.chapter.content.starts_with("Chapter generation failed:"));
    assert!(result
        .phases
        .iter()
        .any(|p| p.name == "specialist-generation" && !p.success));
    // Failure before commit never writes to the store.
    assert_eq!(store.committed_chapters(), 0);
}
