//! Chapterforge - Multi-agent synthesis engine for long-form narrative chapters
//!
//! Chapter authorship is decomposed into specialized generation stages: a
//! structure stage produces a prose skeleton with embedded slot markers,
//! character and scene specialists fill only the slot categories they own,
//! a synthesis stage merges everything with conflict detection and a
//! closing hook, and an editing loop refines the result against a quality
//! rubric. A sequential coordinator binds the stages with uniform failure
//! handling and commits the finished chapter to a coherence store.

pub mod application;
pub mod domain;
pub mod infrastructure;
