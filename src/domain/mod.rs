//! Domain layer - Core narrative model with no external dependencies
//!
//! This layer contains:
//! - Entities: StructureFramework, ChapterRecord
//! - Value Objects: slots and slot mappings, chapter plans, conflict
//!   records, editing decisions

pub mod entities;
pub mod value_objects;
