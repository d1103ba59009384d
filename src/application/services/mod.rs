//! Application services - The generation pipeline stages
//!
//! Each stage is a small service generic over the LLM port, following the
//! same shape: build prompts, await one generation call, recover structure
//! from the response. The pipeline service binds them in fixed order.

pub mod character_service;
pub mod editing_service;
pub mod pipeline_service;
pub mod scene_service;
pub mod slot_parser;
pub mod specialist;
pub mod structure_service;
pub mod synthesis_service;

pub use character_service::{CharacterRequest, CharacterStage};
pub use editing_service::{EditingContext, EditingError, EditingLoop, EditingOutcome, MAX_ITERATIONS};
pub use pipeline_service::ChapterPipeline;
pub use scene_service::{SceneRequest, SceneStage, SceneType};
pub use slot_parser::{SlotExtraction, SlotParser};
pub use specialist::{DialogueRequirement, SpecialistError, SpecialistOutput};
pub use structure_service::{StructureError, StructureOutput, StructureRequest, StructureStage};
pub use synthesis_service::{SynthesisError, SynthesisOutput, SynthesisRequest, SynthesisStage};
