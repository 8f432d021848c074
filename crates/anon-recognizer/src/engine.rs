//! Regex-backed recognition engine
//!
//! Holds compiled pattern recognizers keyed by language and produces raw
//! scored spans. Overlaps between different entity types are left for the
//! resolver; only same-type duplicates are collapsed here.

use std::collections::HashSet;

use anon_core::{DetectionConfig, EntitySpan, Result};

use crate::recognizer::{ContextSettings, PatternRecognizer, RecognizerDefinition, RecognizerInfo};
use crate::RecognitionEngine;

/// Pattern-based recognition engine
pub struct PatternEngine {
    recognizers: Vec<PatternRecognizer>,
    signatures: HashSet<(String, String, Vec<String>)>,
    context: ContextSettings,
    score_threshold: f32,
}

impl PatternEngine {
    /// Create an empty engine with default detection settings
    pub fn new() -> Self {
        Self::from_config(&DetectionConfig::default())
    }

    /// Create an empty engine from detection settings
    pub fn from_config(config: &DetectionConfig) -> Self {
        Self {
            recognizers: Vec::new(),
            signatures: HashSet::new(),
            context: ContextSettings::from(config),
            score_threshold: config.score_threshold,
        }
    }

    /// Override the minimum score of returned spans
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// Collapse same-type duplicates: identical ranges keep the highest
    /// score, and a span nested inside a same-type span scoring at least as
    /// high is dropped.
    fn deduplicate(&self, mut spans: Vec<EntitySpan>) -> Vec<EntitySpan> {
        // Wider spans first so containers are seen before their contents
        spans.sort_by(|a, b| {
            a.entity_type
                .cmp(&b.entity_type)
                .then(a.start.cmp(&b.start))
                .then(b.end.cmp(&a.end))
                .then(b.score.total_cmp(&a.score))
        });

        let mut result: Vec<EntitySpan> = Vec::new();
        for span in spans {
            let shadowed = result.iter().any(|kept| {
                kept.entity_type == span.entity_type
                    && kept.start <= span.start
                    && span.end <= kept.end
                    && span.score <= kept.score
            });
            if !shadowed {
                result.push(span);
            }
        }

        result.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
        result
    }
}

impl Default for PatternEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionEngine for PatternEngine {
    fn add_recognizer(&mut self, definition: RecognizerDefinition) -> Result<bool> {
        let signature = definition.signature();
        if self.signatures.contains(&signature) {
            tracing::trace!(recognizer = %definition.name(), "Recognizer already registered");
            return Ok(false);
        }

        let recognizer = PatternRecognizer::compile(definition)?;
        self.signatures.insert(signature);
        self.recognizers.push(recognizer);
        Ok(true)
    }

    fn analyze(&self, text: &str, language: &str) -> Result<Vec<EntitySpan>> {
        let mut spans = Vec::new();

        for recognizer in self
            .recognizers
            .iter()
            .filter(|r| r.definition().language == language)
        {
            spans.extend(
                recognizer
                    .analyze(text, &self.context)
                    .into_iter()
                    .filter(|s| s.score >= self.score_threshold),
            );
        }

        let spans = self.deduplicate(spans);
        tracing::debug!(
            language,
            span_count = spans.len(),
            text_len = text.len(),
            "Pattern analysis complete"
        );
        Ok(spans)
    }

    fn recognizers(&self) -> Vec<RecognizerInfo> {
        self.recognizers.iter().map(|r| r.info()).collect()
    }
}
