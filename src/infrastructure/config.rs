//! Application configuration

use std::env;

use anyhow::{Context, Result};

/// Application configuration loaded from environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OpenAI-compatible completion endpoint (Ollama's /v1 API)
    pub ollama_base_url: String,
    /// Default model for generation requests
    pub ollama_model: String,

    /// Path to the chapter-generation request JSON
    pub request_path: String,

    /// Whether to route merged chapters through light polish
    pub enable_light_polish: bool,
    /// Total chapters in the story, for coherence-store seeding
    pub chapter_count: u32,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434/v1".to_string()),
            ollama_model: env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.2".to_string()),

            request_path: env::var("CHAPTER_REQUEST_PATH")
                .unwrap_or_else(|_| "chapter_request.json".to_string()),

            enable_light_polish: env::var("ENABLE_LIGHT_POLISH")
                .map(|v| v != "0" && v.to_lowercase() != "false")
                .unwrap_or(true),
            chapter_count: env::var("CHAPTER_COUNT")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("CHAPTER_COUNT must be a number")?,
        })
    }
}
