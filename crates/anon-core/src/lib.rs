//! Anon Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout the
//! anonymization pipeline:
//! - Entity spans produced by recognition and consumed by replacement
//! - Resolved spans and their replacement origin
//! - Per-span decision records and the run report
//! - Common error types
//! - The LLM client seam used for batched replacement generation
//! - Configuration management

pub mod config;
pub mod entity;

pub use config::{
    AppConfig, ConfigError, DetectionConfig, LlmConfig, LlmProvider, LoggingConfig,
    ReplacementConfig, ResolverConfig,
};
pub use entity::normalize_entity_type;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for anonymization operations
#[derive(Error, Debug)]
pub enum AnonError {
    #[error("Invalid span {start}..{end}: {reason}")]
    InvalidSpan {
        start: usize,
        end: usize,
        reason: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Remote generation error: {0}")]
    RemoteError(String),

    #[error("Remote generation timed out after {0}s")]
    Timeout(u64),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AnonError {
    /// Whether a remote failure should move a round-robin client on to its
    /// next provider instead of surfacing immediately.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::RemoteError(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests")
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, AnonError>;

// ============================================================================
// Entity Spans
// ============================================================================

/// A contiguous substring flagged as a PII candidate.
///
/// Offsets are UTF-8 byte offsets into the analyzed text. A span is never
/// mutated after detection; later stages build new values from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySpan {
    /// Entity type label (e.g. `EMAIL_ADDRESS`)
    pub entity_type: String,

    /// Inclusive start offset
    pub start: usize,

    /// Exclusive end offset
    pub end: usize,

    /// Detection confidence (0.0 - 1.0)
    pub score: f32,

    /// The matched substring; may be omitted by external recognizers
    #[serde(default, alias = "raw_txt")]
    pub raw_text: String,
}

/// Outcome of checking a span against the text it claims to cover
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanCheck {
    Valid,
    Empty,
    OutOfBounds,
    NotCharBoundary,
}

impl SpanCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Empty => "start >= end",
            Self::OutOfBounds => "end beyond text length",
            Self::NotCharBoundary => "offset inside a multi-byte character",
        }
    }
}

impl EntitySpan {
    /// Create a new span
    pub fn new(
        entity_type: impl Into<String>,
        start: usize,
        end: usize,
        score: f32,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            start,
            end,
            score,
            raw_text: raw_text.into(),
        }
    }

    /// Create a span whose raw text is sliced from `text`
    pub fn from_text(
        entity_type: impl Into<String>,
        start: usize,
        end: usize,
        score: f32,
        text: &str,
    ) -> Result<Self> {
        let span = Self::new(entity_type, start, end, score, String::new());
        match span.check(text) {
            SpanCheck::Valid => Ok(span.rehydrate(text)),
            check => Err(AnonError::InvalidSpan {
                start,
                end,
                reason: check.reason().to_string(),
            }),
        }
    }

    /// Check the span offsets against `text`
    pub fn check(&self, text: &str) -> SpanCheck {
        if self.start >= self.end {
            SpanCheck::Empty
        } else if self.end > text.len() {
            SpanCheck::OutOfBounds
        } else if !text.is_char_boundary(self.start) || !text.is_char_boundary(self.end) {
            SpanCheck::NotCharBoundary
        } else {
            SpanCheck::Valid
        }
    }

    /// Copy of this span with `raw_text` taken from `text` and the entity
    /// type normalized. Offsets must already be valid.
    pub fn rehydrate(&self, text: &str) -> Self {
        Self {
            entity_type: normalize_entity_type(&self.entity_type),
            start: self.start,
            end: self.end,
            score: self.score,
            raw_text: text[self.start..self.end].to_string(),
        }
    }

    /// Length of the span in bytes
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two half-open ranges intersect
    pub fn overlaps(&self, other: &EntitySpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// How a span's replacement was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplacementOrigin {
    CacheHit,
    LocalRule,
    Remote,
    RemoteFallback,
    Skipped,
}

impl std::fmt::Display for ReplacementOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CacheHit => write!(f, "CACHE_HIT"),
            Self::LocalRule => write!(f, "LOCAL_RULE"),
            Self::Remote => write!(f, "REMOTE"),
            Self::RemoteFallback => write!(f, "REMOTE_FALLBACK"),
            Self::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// A span together with its final replacement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSpan {
    pub span: EntitySpan,
    pub replacement: String,
    pub origin: ReplacementOrigin,
}

impl ResolvedSpan {
    pub fn new(span: EntitySpan, replacement: impl Into<String>, origin: ReplacementOrigin) -> Self {
        Self {
            span,
            replacement: replacement.into(),
            origin,
        }
    }

    /// A skipped span keeps its original text
    pub fn skipped(span: EntitySpan) -> Self {
        let replacement = span.raw_text.clone();
        Self::new(span, replacement, ReplacementOrigin::Skipped)
    }

    pub fn is_skipped(&self) -> bool {
        self.origin == ReplacementOrigin::Skipped
    }
}

// ============================================================================
// Decision Log
// ============================================================================

/// One observable decision. Raw text is deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub entity_type: String,
    pub start: usize,
    pub end: usize,
    pub raw_len: usize,
    pub replacement_len: usize,
    pub origin: ReplacementOrigin,
    /// Produced by the post-reconstruction safety-net scan
    pub safety_net: bool,
}

impl DecisionRecord {
    pub fn from_resolved(resolved: &ResolvedSpan) -> Self {
        Self {
            entity_type: resolved.span.entity_type.clone(),
            start: resolved.span.start,
            end: resolved.span.end,
            raw_len: resolved.span.raw_text.chars().count(),
            replacement_len: resolved.replacement.chars().count(),
            origin: resolved.origin,
            safety_net: false,
        }
    }
}

/// Counters per replacement origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginCounts {
    pub cache_hit: usize,
    pub local_rule: usize,
    pub remote: usize,
    pub remote_fallback: usize,
    pub skipped: usize,
}

impl OriginCounts {
    pub fn record(&mut self, origin: ReplacementOrigin) {
        match origin {
            ReplacementOrigin::CacheHit => self.cache_hit += 1,
            ReplacementOrigin::LocalRule => self.local_rule += 1,
            ReplacementOrigin::Remote => self.remote += 1,
            ReplacementOrigin::RemoteFallback => self.remote_fallback += 1,
            ReplacementOrigin::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.cache_hit + self.local_rule + self.remote + self.remote_fallback + self.skipped
    }
}

/// Structured per-run decision log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationReport {
    /// Unique identifier of this run
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Spans dropped before resolution (malformed or below threshold)
    pub dropped_spans: usize,

    /// Remote batches sent
    pub remote_batches: usize,

    /// Remote batches that degraded to local fallback
    pub remote_failures: usize,

    pub counts: OriginCounts,

    pub decisions: Vec<DecisionRecord>,
}

impl AnonymizationReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dropped_spans: 0,
            remote_batches: 0,
            remote_failures: 0,
            counts: OriginCounts::default(),
            decisions: Vec::new(),
        }
    }

    /// Append a decision and update counters
    pub fn record(&mut self, decision: DecisionRecord) {
        self.counts.record(decision.origin);
        self.decisions.push(decision);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn safety_net_hits(&self) -> usize {
        self.decisions.iter().filter(|d| d.safety_net).count()
    }
}

impl Default for AnonymizationReport {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Trait for text-generation collaborators used to produce replacements
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send fixed system instructions plus a user prompt, return raw text
    async fn chat(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;

    /// Provider/model name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_check() {
        let text = "Call 0912-345-678 now";
        assert_eq!(
            EntitySpan::new("PHONE_NUMBER", 5, 17, 0.9, "").check(text),
            SpanCheck::Valid
        );
        assert_eq!(
            EntitySpan::new("PHONE_NUMBER", 5, 5, 0.9, "").check(text),
            SpanCheck::Empty
        );
        assert_eq!(
            EntitySpan::new("PHONE_NUMBER", 5, 99, 0.9, "").check(text),
            SpanCheck::OutOfBounds
        );
    }

    #[test]
    fn test_span_check_char_boundary() {
        let text = "王小明的電話";
        // "王" is three bytes long
        let span = EntitySpan::new("PERSON", 1, 9, 0.9, "");
        assert_eq!(span.check(text), SpanCheck::NotCharBoundary);

        let span = EntitySpan::from_text("person", 0, 9, 0.9, text).unwrap();
        assert_eq!(span.raw_text, "王小明");
        assert_eq!(span.entity_type, "PERSON");
    }

    #[test]
    fn test_from_text_rejects_malformed() {
        let err = EntitySpan::from_text("EMAIL", 4, 2, 0.9, "abcdef").unwrap_err();
        assert!(matches!(err, AnonError::InvalidSpan { .. }));
    }

    #[test]
    fn test_overlaps() {
        let a = EntitySpan::new("PERSON", 0, 8, 0.9, "");
        let b = EntitySpan::new("ORGANIZATION", 0, 10, 0.95, "");
        let c = EntitySpan::new("LOCATION", 10, 12, 0.95, "");
        assert!(a.overlaps(&b));
        assert!(!b.overlaps(&c));
    }

    #[test]
    fn test_origin_serialization() {
        let json = serde_json::to_string(&ReplacementOrigin::RemoteFallback).unwrap();
        assert_eq!(json, "\"REMOTE_FALLBACK\"");
        assert_eq!(ReplacementOrigin::CacheHit.to_string(), "CACHE_HIT");
    }

    #[test]
    fn test_span_deserializes_without_raw_text() {
        let span: EntitySpan =
            serde_json::from_str(r#"{"entity_type":"PERSON","start":0,"end":4,"score":0.8}"#)
                .unwrap();
        assert!(span.raw_text.is_empty());

        let span: EntitySpan = serde_json::from_str(
            r#"{"entity_type":"PERSON","start":0,"end":4,"score":0.8,"raw_txt":"John"}"#,
        )
        .unwrap();
        assert_eq!(span.raw_text, "John");
    }

    #[test]
    fn test_report_counts() {
        let mut report = AnonymizationReport::new();
        let span = EntitySpan::new("PERSON", 0, 4, 0.9, "John");
        report.record(DecisionRecord::from_resolved(&ResolvedSpan::new(
            span.clone(),
            "Mark",
            ReplacementOrigin::Remote,
        )));
        report.record(DecisionRecord::from_resolved(&ResolvedSpan::skipped(span)));
        report.finish();

        assert_eq!(report.counts.remote, 1);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.counts.total(), 2);
        assert!(report.finished_at.is_some());
        assert_eq!(report.safety_net_hits(), 0);
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(AnonError::RemoteError("HTTP 429: slow down".into()).is_rate_limited());
        assert!(AnonError::Timeout(15).is_rate_limited());
        assert!(!AnonError::RemoteError("HTTP 500".into()).is_rate_limited());
    }

    struct EchoClient;

    #[async_trait::async_trait]
    impl LlmClient for EchoClient {
        async fn chat(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
            Ok(user_prompt.to_uppercase())
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    #[test]
    fn test_llm_client_object_safety() {
        let client: Box<dyn LlmClient> = Box::new(EchoClient);
        let out = tokio_test::block_on(client.chat("sys", "abc")).unwrap();
        assert_eq!(out, "ABC");
        assert_eq!(client.name(), "echo");
    }
}
