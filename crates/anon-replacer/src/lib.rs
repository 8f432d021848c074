//! Anon Replacer - Replacement pipeline for detected PII
//!
//! This crate turns resolved spans into anonymized text:
//! - Persistent mapping cache for consistent replacements
//! - Deterministic, format-preserving synthetic values
//! - Batched remote generation with strict local fallback
//! - Post-reconstruction safety net
//!
//! [`Anonymizer`] wires detection, overlap resolution and replacement
//! into a single call.

pub mod batch;
pub mod cache;
pub mod generator;
pub mod llm;
pub mod orchestrator;
pub mod rules;
pub mod safety;

pub use cache::{cache_key, CacheStatsReport, MappingCache, SharedMappingCache};
pub use generator::SyntheticValueGenerator;
pub use llm::{create_llm_client, OllamaClient, OpenAiClient, RoundRobinClient};
pub use orchestrator::{
    splice, AnonymizationOutcome, RemoteOutcome, ReplacementOrchestrator, RetryPolicy,
};

use std::sync::Arc;

use anon_core::{AppConfig, EntitySpan, LlmClient, Result};
use anon_recognizer::{
    OverlapResolver, PatternEngine, PatternRecognizerRegistry, RecognitionEngine, RecognizerInfo,
};

/// Detection, resolution and replacement for whole texts
pub struct Anonymizer {
    engine: Box<dyn RecognitionEngine>,
    resolver: OverlapResolver,
    orchestrator: ReplacementOrchestrator,
}

impl Anonymizer {
    pub fn new(
        engine: Box<dyn RecognitionEngine>,
        resolver: OverlapResolver,
        orchestrator: ReplacementOrchestrator,
    ) -> Self {
        Self {
            engine,
            resolver,
            orchestrator,
        }
    }

    /// Build the default pipeline: pattern engine with generic and locale
    /// recognizers for every configured language, the cache at the
    /// configured path, and `client` for remote generation
    pub fn from_config(config: &AppConfig, client: Option<Arc<dyn LlmClient>>) -> Result<Self> {
        let mut engine = PatternEngine::from_config(&config.detection);
        PatternRecognizerRegistry::new(&config.detection.languages)
            .with_generic_recognizers()
            .register(&mut engine)?;

        let cache = MappingCache::open(&config.replacement.cache_path);
        let generator = SyntheticValueGenerator::new(&config.replacement);
        let orchestrator = ReplacementOrchestrator::new(config, cache, generator, client);

        Ok(Self::new(
            Box::new(engine),
            OverlapResolver::new(&config.resolver),
            orchestrator,
        ))
    }

    /// Registered recognizers
    pub fn recognizers(&self) -> Vec<RecognizerInfo> {
        self.engine.recognizers()
    }

    pub fn orchestrator(&self) -> &ReplacementOrchestrator {
        &self.orchestrator
    }

    pub fn orchestrator_mut(&mut self) -> &mut ReplacementOrchestrator {
        &mut self.orchestrator
    }

    /// Detect, resolve and replace PII in `text`. `extra_spans` come from
    /// an external recognizer (e.g. statistical NER) and are resolved
    /// together with the pattern matches.
    pub async fn anonymize_text(
        &mut self,
        text: &str,
        language: &str,
        extra_spans: &[EntitySpan],
    ) -> Result<AnonymizationOutcome> {
        let mut candidates = self.engine.analyze(text, language)?;
        candidates.extend_from_slice(extra_spans);

        let resolution = self.resolver.resolve_with_stats(text, &candidates);
        tracing::debug!(
            language,
            candidates = candidates.len(),
            resolved = resolution.spans.len(),
            "Spans resolved"
        );

        let mut outcome = self.orchestrator.anonymize(text, &resolution.spans).await;
        outcome.report.dropped_spans += resolution.dropped();
        Ok(outcome)
    }
}
