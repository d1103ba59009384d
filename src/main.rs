//! Chapterforge - Generate one narrative chapter from a plan file
//!
//! Reads a `ChapterGenerationRequest` from JSON, wires the OpenAI-compatible
//! client and the in-memory coherence store, runs the pipeline once, and
//! prints the result as JSON on stdout.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chapterforge::application::dto::{ChapterGenerationRequest, GenerationConfig};
use chapterforge::application::ports::outbound::LlmPort;
use chapterforge::application::services::ChapterPipeline;
use chapterforge::infrastructure::{AppConfig, InMemoryCoherenceStore, OllamaClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chapterforge=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Chapterforge");

    let config = AppConfig::from_env()?;
    tracing::info!("Configuration loaded");
    tracing::info!("  Completion endpoint: {}", config.ollama_base_url);
    tracing::info!("  Model: {}", config.ollama_model);

    let request_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.request_path.clone());
    let request_json = std::fs::read_to_string(&request_path)
        .map_err(|e| anyhow::anyhow!("cannot read chapter request {}: {}", request_path, e))?;
    let request: ChapterGenerationRequest = serde_json::from_str(&request_json)
        .map_err(|e| anyhow::anyhow!("invalid chapter request {}: {}", request_path, e))?;
    tracing::info!(
        chapter = request.chapter_number,
        title = %request.plan.title,
        "chapter request loaded"
    );

    let llm = Arc::new(OllamaClient::new(
        &config.ollama_base_url,
        &config.ollama_model,
    ));
    if let Err(e) = llm.health_check().await {
        tracing::warn!("completion endpoint health check failed: {}", e);
    }

    let store = Arc::new(InMemoryCoherenceStore::new());
    let generation_config = GenerationConfig {
        enable_light_polish: config.enable_light_polish,
        chapter_count: config.chapter_count,
        ..Default::default()
    };

    let pipeline = ChapterPipeline::new(llm, store, generation_config);
    let result = pipeline.generate_chapter(&request).await;

    for phase in &result.phases {
        tracing::info!(
            phase = %phase.name,
            success = phase.success,
            duration_ms = phase.duration_ms,
            warnings = phase.warnings.len(),
            "phase outcome"
        );
    }
    tracing::info!(
        success = result.success,
        total_time_ms = result.metadata.total_time_ms,
        "generation finished"
    );

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
