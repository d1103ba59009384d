//! Entities - Objects with identity and lifecycle

mod chapter;
mod framework;

pub use chapter::ChapterRecord;
pub use framework::{FrameworkError, StructureFramework, MARKER_RE};
