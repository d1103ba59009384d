//! Outbound ports - Interfaces that the application requires from external systems

mod coherence_port;
mod llm_port;

pub use coherence_port::{
    BalanceIssue, BalanceIssueKind, BalanceReport, ChapterContext, CharacterContext,
    CharacterState, CoherenceConstraints, CoherenceError, CoherenceStorePort, LimitAction,
    LimitCheck, LocationContext, RepetitionIssue, RepetitionReport, RepetitionSeverity,
    SceneContext, StructureContext, ToneGuidance,
};
pub use llm_port::{ChatMessage, LlmPort, LlmRequest, LlmResponse, MessageRole, ProviderError};
