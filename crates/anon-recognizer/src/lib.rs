//! Anon Recognizer - Pattern detection and span refinement
//!
//! Extends a generic recognition engine with locale-specific pattern
//! recognizers (national IDs, business numbers, local phone formats,
//! durations, MAC addresses, health-insurance numbers), scores matches
//! with validators and context keywords, and resolves overlapping
//! candidates into a disjoint span list.

use anon_core::{EntitySpan, Result};

pub mod engine;
pub mod recognizer;
pub mod registry;
pub mod resolver;

pub use engine::PatternEngine;
pub use recognizer::{
    ContextSettings, PatternSpec, RecognizerDefinition, RecognizerInfo, ValidationOutcome,
};
pub use registry::PatternRecognizerRegistry;
pub use resolver::OverlapResolver;

/// Trait for recognition engines that custom recognizers plug into
pub trait RecognitionEngine: Send + Sync {
    /// Add a recognizer. Returns `false` when an identical recognizer is
    /// already registered.
    fn add_recognizer(&mut self, definition: RecognizerDefinition) -> Result<bool>;

    /// Raw scored spans for `text` in `language`
    fn analyze(&self, text: &str, language: &str) -> Result<Vec<EntitySpan>>;

    /// Registered recognizers
    fn recognizers(&self) -> Vec<RecognizerInfo>;
}
