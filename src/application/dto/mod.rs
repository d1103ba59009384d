//! Data Transfer Objects - For API boundaries

mod generation;

pub use generation::{
    AgentKind, AgentMetadata, AgentTiming, ChapterGenerationRequest, ChapterGenerationResult,
    GenerationConfig, GenerationMetadata, PhaseOutput, PhaseResult, QualityMetrics,
};
