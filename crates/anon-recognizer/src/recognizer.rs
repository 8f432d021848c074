//! Recognizer definitions and compiled pattern recognizers
//!
//! A recognizer is a value object: an entity type, ordered regex patterns
//! with base scores, an optional validator, an optional confidence
//! enhancer and context keywords. Behavior is looked up by entity type
//! string, never through a type hierarchy.

use anon_core::{AnonError, DetectionConfig, EntitySpan, Result};
use regex::Regex;
use serde::Serialize;

/// Score ceiling applied to matches whose validator fails.
///
/// Failing matches are kept so the threshold stage excludes them together
/// with every other low-confidence candidate.
pub const SOFT_REJECT_SCORE: f32 = 0.20;

/// Checks the exact matched substring
pub type Validator = fn(&str) -> bool;

/// Re-scores a candidate given the full text
pub type ConfidenceEnhancer = fn(&EntitySpan, &str) -> f32;

// ============================================================================
// Definitions
// ============================================================================

/// One regex pattern with its base score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternSpec {
    pub name: String,
    pub regex: String,
    pub base_score: f32,
}

impl PatternSpec {
    pub fn new(name: impl Into<String>, regex: impl Into<String>, base_score: f32) -> Self {
        Self {
            name: name.into(),
            regex: regex.into(),
            base_score,
        }
    }
}

/// Result of running a recognizer's validator on a match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    Passed,
    Failed,
    NotValidated,
}

impl ValidationOutcome {
    pub fn failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Declarative recognizer for one entity type in one language
#[derive(Debug, Clone)]
pub struct RecognizerDefinition {
    pub entity_type: String,
    pub patterns: Vec<PatternSpec>,
    pub validator: Option<Validator>,
    pub confidence_enhancer: Option<ConfidenceEnhancer>,
    pub context_keywords: Vec<String>,
    pub language: String,
}

impl RecognizerDefinition {
    /// Create a definition with no patterns for `language`
    pub fn new(entity_type: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            patterns: Vec::new(),
            validator: None,
            confidence_enhancer: None,
            context_keywords: Vec::new(),
            language: language.into(),
        }
    }

    pub fn with_pattern(mut self, name: &str, regex: &str, base_score: f32) -> Self {
        self.patterns.push(PatternSpec::new(name, regex, base_score));
        self
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_enhancer(mut self, enhancer: ConfidenceEnhancer) -> Self {
        self.confidence_enhancer = Some(enhancer);
        self
    }

    pub fn with_context(mut self, keywords: &[&str]) -> Self {
        self.context_keywords = keywords.iter().map(|k| k.to_string()).collect();
        self
    }

    /// Copy of this definition bound to another language tag
    pub fn for_language(&self, language: &str) -> Self {
        Self {
            language: language.to_string(),
            ..self.clone()
        }
    }

    /// Recognizer name, unique per entity type and language
    pub fn name(&self) -> String {
        format!("{}_{}", self.entity_type, self.language)
    }

    /// Identity used for idempotent registration
    pub fn signature(&self) -> (String, String, Vec<String>) {
        (
            self.entity_type.clone(),
            self.language.clone(),
            self.patterns.iter().map(|p| p.name.clone()).collect(),
        )
    }

    /// Run the validator on a raw match
    pub fn validate(&self, raw: &str) -> ValidationOutcome {
        match self.validator {
            Some(validator) if validator(raw) => ValidationOutcome::Passed,
            Some(_) => ValidationOutcome::Failed,
            None => ValidationOutcome::NotValidated,
        }
    }

    /// Score a candidate. The enhancer owns the decision when present;
    /// otherwise a failed validation caps the score.
    pub fn enhance(&self, candidate: &EntitySpan, text: &str, outcome: ValidationOutcome) -> f32 {
        match self.confidence_enhancer {
            Some(enhancer) => enhancer(candidate, text),
            None if outcome.failed() => candidate.score.min(SOFT_REJECT_SCORE),
            None => candidate.score,
        }
    }
}

/// Summary of a registered recognizer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecognizerInfo {
    pub name: String,
    pub entity_type: String,
    pub language: String,
    pub pattern_count: usize,
    pub has_validator: bool,
    pub context_keywords: Vec<String>,
}

// ============================================================================
// Context scoring
// ============================================================================

/// Context keyword scoring parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextSettings {
    /// Words before a match that are searched
    pub window_words: usize,
    /// Added to the score when a keyword is present
    pub similarity_factor: f32,
    /// Minimum score after a boost
    pub min_score_with_context: f32,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for ContextSettings {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            window_words: config.context_window_words,
            similarity_factor: config.context_similarity_factor,
            min_score_with_context: config.min_score_with_context,
        }
    }
}

impl ContextSettings {
    /// Apply the context boost to `score`
    pub fn boost(&self, score: f32) -> f32 {
        (score + self.similarity_factor)
            .max(self.min_score_with_context)
            .min(1.0)
    }
}

/// Whether any keyword appears within the last `window_words` words before
/// `start`. ASCII keywords match whole words (multi-word keywords match as
/// a phrase); other keywords match as substrings since CJK text has no
/// word separators.
pub fn has_context(text: &str, start: usize, keywords: &[String], window_words: usize) -> bool {
    if keywords.is_empty() || window_words == 0 {
        return false;
    }

    let prefix = text[..start].to_lowercase();
    let words: Vec<&str> = prefix
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let window = &words[words.len().saturating_sub(window_words)..];
    let phrase = window.join(" ");

    keywords.iter().any(|keyword| {
        let keyword = keyword.to_lowercase();
        if !keyword.is_ascii() {
            window.iter().any(|w| w.contains(&keyword))
        } else if keyword.contains(' ') {
            format!(" {phrase} ").contains(&format!(" {keyword} "))
        } else {
            window.iter().any(|w| *w == keyword)
        }
    })
}

// ============================================================================
// Compiled recognizer
// ============================================================================

/// A definition with its patterns compiled
#[derive(Debug, Clone)]
pub struct PatternRecognizer {
    definition: RecognizerDefinition,
    compiled: Vec<(PatternSpec, Regex)>,
}

impl PatternRecognizer {
    /// Compile every pattern of `definition`
    pub fn compile(definition: RecognizerDefinition) -> Result<Self> {
        let compiled = definition
            .patterns
            .iter()
            .map(|spec| {
                Regex::new(&spec.regex)
                    .map(|regex| (spec.clone(), regex))
                    .map_err(|e| {
                        AnonError::ConfigError(format!(
                            "pattern {} for {}: {e}",
                            spec.name, definition.entity_type
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            definition,
            compiled,
        })
    }

    pub fn definition(&self) -> &RecognizerDefinition {
        &self.definition
    }

    pub fn info(&self) -> RecognizerInfo {
        RecognizerInfo {
            name: self.definition.name(),
            entity_type: self.definition.entity_type.clone(),
            language: self.definition.language.clone(),
            pattern_count: self.compiled.len(),
            has_validator: self.definition.validator.is_some(),
            context_keywords: self.definition.context_keywords.clone(),
        }
    }

    /// Match every pattern independently and score each candidate
    pub fn analyze(&self, text: &str, context: &ContextSettings) -> Vec<EntitySpan> {
        let mut spans = Vec::new();

        for (spec, regex) in &self.compiled {
            for mat in regex.find_iter(text) {
                let candidate = EntitySpan::new(
                    self.definition.entity_type.clone(),
                    mat.start(),
                    mat.end(),
                    spec.base_score,
                    mat.as_str(),
                );

                let outcome = self.definition.validate(mat.as_str());
                let mut score = self.definition.enhance(&candidate, text, outcome);
                let rejected =
                    outcome.failed() || (score < candidate.score && score <= SOFT_REJECT_SCORE);

                // Context never lifts a rejected match
                if !rejected
                    && has_context(
                        text,
                        mat.start(),
                        &self.definition.context_keywords,
                        context.window_words,
                    )
                {
                    score = context.boost(score);
                }

                spans.push(EntitySpan { score, ..candidate });
            }
        }

        spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digits_only(raw: &str) -> bool {
        raw.chars().all(|c| c.is_ascii_digit())
    }

    #[test]
    fn test_validate_and_soft_reject() {
        let def = RecognizerDefinition::new("TEST_ID", "en")
            .with_pattern("id", r"\b[0-9A-Z]{4}\b", 0.8)
            .with_validator(digits_only);

        let recognizer = PatternRecognizer::compile(def).unwrap();
        let spans = recognizer.analyze("1234 AB12", &ContextSettings::default());

        assert_eq!(spans.len(), 2);
        assert!((spans[0].score - 0.8).abs() < f32::EPSILON);
        // Failing validation keeps the match with a capped score
        assert_eq!(spans[1].raw_text, "AB12");
        assert!(spans[1].score <= SOFT_REJECT_SCORE);
    }

    #[test]
    fn test_context_boost() {
        let def = RecognizerDefinition::new("TEST_ID", "en")
            .with_pattern("id", r"\b[0-9]{4}\b", 0.3)
            .with_context(&["badge"]);
        let recognizer = PatternRecognizer::compile(def).unwrap();

        let boosted = recognizer.analyze("my badge is 1234", &ContextSettings::default());
        let plain = recognizer.analyze("the year was 1234", &ContextSettings::default());

        assert!((boosted[0].score - 0.65).abs() < 1e-5);
        assert!((plain[0].score - 0.3).abs() < 1e-5);
    }

    #[test]
    fn test_context_does_not_lift_failed_validation() {
        let def = RecognizerDefinition::new("TEST_ID", "en")
            .with_pattern("id", r"\b[0-9A-Z]{4}\b", 0.9)
            .with_validator(digits_only)
            .with_context(&["badge"]);
        let recognizer = PatternRecognizer::compile(def).unwrap();

        let spans = recognizer.analyze("badge AB12", &ContextSettings::default());
        assert!(spans[0].score <= SOFT_REJECT_SCORE);
    }

    #[test]
    fn test_has_context_keyword_forms() {
        let keywords = vec!["ID number".to_string(), "統編".to_string(), "tel".to_string()];

        assert!(has_context("Your ID number: A123456789", 16, &keywords, 5));
        assert!(has_context("公司統編：12345675", 15, &keywords, 5));
        assert!(has_context("Tel. 02-2345-6789", 5, &keywords, 5));
        // Whole-word match only for ASCII keywords
        assert!(!has_context("hotel 02-2345-6789", 6, &keywords, 5));
        // Outside the window
        assert!(!has_context("tel a b c d e f 0223456789", 16, &keywords, 5));
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let def = RecognizerDefinition::new("BROKEN", "en").with_pattern("bad", r"(", 0.5);
        assert!(PatternRecognizer::compile(def).is_err());
    }

    #[test]
    fn test_for_language_and_signature() {
        let def = RecognizerDefinition::new("MAC_ADDRESS", "en").with_pattern("a", "x", 0.5);
        let zh = def.for_language("zh");

        assert_eq!(zh.name(), "MAC_ADDRESS_zh");
        assert_ne!(def.signature(), zh.signature());
        assert_eq!(def.signature(), def.clone().signature());
    }
}
