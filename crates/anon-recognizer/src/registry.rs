//! Pattern recognizer registry
//!
//! Declares the locale-specific recognizers the generic engine lacks and
//! registers them once per supported language tag, since engines dispatch
//! recognizers per language.

use anon_core::entity::{
    CREDIT_CARD, DATE_TIME, DURATION_TIME, EMAIL_ADDRESS, IP_ADDRESS, MAC_ADDRESS, PHONE_NUMBER,
    TW_HOME_NUMBER, TW_ID_NUMBER, TW_NHI_NUMBER, TW_PHONE_NUMBER, UNIFIED_BUSINESS_NO, URL,
    US_SSN,
};
use anon_core::{EntitySpan, Result};

use crate::recognizer::{RecognizerDefinition, SOFT_REJECT_SCORE};
use crate::RecognitionEngine;

/// Score a validated business number or MAC address is raised to
const CONFIRMED_SCORE: f32 = 0.90;

// ============================================================================
// Validators and enhancers
// ============================================================================

/// Unified business number checksum.
///
/// Digits are weighted `1,2,1,2,1,2,4,1`, the digits of each product are
/// summed, and the total must be divisible by 10. When the seventh product
/// has two digits, a total one short of a multiple of 10 also passes.
pub fn validate_business_number(raw: &str) -> bool {
    const WEIGHTS: [u32; 8] = [1, 2, 1, 2, 1, 2, 4, 1];

    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 8 || raw.chars().count() != 8 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .zip(WEIGHTS)
        .map(|(d, w)| {
            let product = d * w;
            product / 10 + product % 10
        })
        .sum();

    if digits[6] * 4 >= 10 {
        sum % 10 == 0 || (sum + 1) % 10 == 0
    } else {
        sum % 10 == 0
    }
}

fn enhance_business_number(candidate: &EntitySpan, text: &str) -> f32 {
    if validate_business_number(&text[candidate.start..candidate.end]) {
        candidate.score.max(CONFIRMED_SCORE)
    } else {
        candidate.score.min(SOFT_REJECT_SCORE)
    }
}

/// Normalize a MAC address to lower-case colon-separated form
pub fn normalize_mac(raw: &str) -> String {
    let lower = raw.to_lowercase();
    if lower.contains('.') {
        let hex: Vec<char> = lower.chars().filter(|c| *c != '.').collect();
        hex.chunks(2)
            .map(|pair| pair.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join(":")
    } else {
        lower.replace('-', ":")
    }
}

/// A MAC address must use one separator style throughout
pub fn validate_mac(raw: &str) -> bool {
    let separators: Vec<char> = raw.chars().filter(|c| !c.is_ascii_hexdigit()).collect();
    match separators.first() {
        Some(first) => separators.iter().all(|c| c == first),
        None => false,
    }
}

fn enhance_mac(candidate: &EntitySpan, text: &str) -> f32 {
    let raw = &text[candidate.start..candidate.end];
    if !validate_mac(raw) {
        return candidate.score.min(SOFT_REJECT_SCORE);
    }

    // Placeholder addresses are rarely real PII
    match normalize_mac(raw).as_str() {
        "00:00:00:00:00:00" | "ff:ff:ff:ff:ff:ff" => candidate.score.min(SOFT_REJECT_SCORE),
        _ => candidate.score.max(CONFIRMED_SCORE),
    }
}

/// Landline matches must not carry a mobile prefix
fn validate_landline(raw: &str) -> bool {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    !digits.starts_with("09")
}

/// Luhn checksum for card numbers
pub fn validate_luhn(raw: &str) -> bool {
    let digits: Vec<u32> = raw.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 12 {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                *d
            }
        })
        .sum();

    sum % 10 == 0
}

// ============================================================================
// Registry
// ============================================================================

/// Supplementary recognizer definitions, registered per language
#[derive(Debug, Clone)]
pub struct PatternRecognizerRegistry {
    /// Language-agnostic templates; `language` is rebound at registration
    templates: Vec<RecognizerDefinition>,
    languages: Vec<String>,
}

impl PatternRecognizerRegistry {
    /// Create a registry with the locale recognizers for `languages`
    pub fn new(languages: &[String]) -> Self {
        let mut registry = Self {
            templates: Vec::new(),
            languages: languages.to_vec(),
        };
        registry.init_locale_recognizers();
        registry
    }

    /// Also register stand-ins for the generic engine's native recognizers
    /// (email, phone, SSN, IP, credit card, URL, dates)
    pub fn with_generic_recognizers(mut self) -> Self {
        self.init_generic_recognizers();
        self
    }

    /// Add a custom template
    pub fn add(&mut self, template: RecognizerDefinition) {
        self.templates.push(template);
    }

    pub fn languages(&self) -> &[String] {
        &self.languages
    }

    /// Definitions expanded for every supported language
    pub fn definitions(&self) -> Vec<RecognizerDefinition> {
        self.languages
            .iter()
            .flat_map(|lang| self.templates.iter().map(move |t| t.for_language(lang)))
            .collect()
    }

    /// Register every definition into `engine`. Repeated calls with the
    /// same definitions leave the engine unchanged.
    pub fn register(&self, engine: &mut dyn RecognitionEngine) -> Result<usize> {
        let mut added = 0;
        for definition in self.definitions() {
            if engine.add_recognizer(definition)? {
                added += 1;
            }
        }

        tracing::debug!(
            added,
            languages = ?self.languages,
            "Registered pattern recognizers"
        );
        Ok(added)
    }

    fn init_locale_recognizers(&mut self) {
        // Durations ("15 years of experience", "3 months ago")
        self.add(
            RecognizerDefinition::new(DURATION_TIME, "")
                .with_pattern(
                    "duration_years_experience_variations",
                    r"\b[0-9]+\s+years?\s+of\s+(?:working\s+)?experiences?\b",
                    0.98,
                )
                .with_pattern(
                    "duration_years_experience",
                    r"\b[0-9]+\s+years?\s+of\s+experiences?\b",
                    0.98,
                )
                .with_pattern("duration_years_old", r"\b[0-9]+\s+years?\s+old\b", 0.98)
                .with_pattern(
                    "duration_years_experience_with_adjectives",
                    r"\b[0-9]+\s+years?\s+of\s+(?:working|professional|relevant|related|practical)\s+experiences?\b",
                    0.98,
                )
                .with_pattern(
                    "duration_years_work",
                    r"\b[0-9]+\s+years?\s+(?:of\s+)?(?:work|working|service|training|study|employment)\b",
                    0.96,
                )
                .with_pattern(
                    "duration_time_ago",
                    r"\b[0-9]+\s+(?:years?|months?|weeks?|days?)\s+ago\b",
                    0.95,
                )
                .with_pattern(
                    "duration_months_experience",
                    r"\b[0-9]+\s+months?\s+(?:of\s+)?(?:experience|work|service)\b",
                    0.95,
                )
                .with_pattern(
                    "duration_months_working_experience",
                    r"\b[0-9]+\s+months?\s+(?:of\s+)?(?:working\s+)?experiences?\b",
                    0.95,
                )
                .with_pattern(
                    "duration_general_with_context",
                    r"\b[0-9]+\s+(?:years?|months?|weeks?|days?)\s+(?:of\s+)?(?:working\s+)?(?:experiences?|work|service|training|study|employment|ago)\b",
                    0.90,
                )
                .with_context(&[
                    "experience",
                    "work",
                    "service",
                    "training",
                    "employment",
                    "old",
                    "ago",
                    "years",
                    "months",
                    "weeks",
                    "days",
                ]),
        );

        // National ID: one letter, gender digit, eight digits
        self.add(
            RecognizerDefinition::new(TW_ID_NUMBER, "")
                .with_pattern("tw_id_pattern", r"\b[A-Z][12][0-9]{8}\b", 0.85)
                .with_context(&["身分證", "身份證", "ID", "ID number"]),
        );

        // Unified business number with checksum-driven scoring
        self.add(
            RecognizerDefinition::new(UNIFIED_BUSINESS_NO, "")
                .with_pattern("tw_ubn_pattern", r"\b[0-9]{8}\b", 0.90)
                .with_validator(validate_business_number)
                .with_enhancer(enhance_business_number)
                .with_context(&[
                    "統編",
                    "統一編號",
                    "UBN",
                    "company",
                    "tax",
                    "Unified Business No",
                ]),
        );

        // Mobile numbers, domestic and +886 forms
        self.add(
            RecognizerDefinition::new(TW_PHONE_NUMBER, "")
                .with_pattern(
                    "tw_mobile_domestic",
                    r"\b09[0-9]{2}[-\s]?[0-9]{3}[-\s]?[0-9]{3}\b",
                    0.85,
                )
                .with_pattern(
                    "tw_mobile_intl_spaced",
                    r"(?:\+886|\(\+886\))\s*9[0-9]{2}\s*[0-9]{3}\s*[0-9]{3}\b",
                    0.85,
                )
                .with_pattern("tw_mobile_intl_compact", r"\+886\s*9[0-9]{8}\b", 0.85)
                .with_pattern("tw_mobile_intl_no_space", r"\+8869[0-9]{8}\b", 0.95)
                .with_context(&[
                    "手機",
                    "行動",
                    "phone",
                    "mobile",
                    "tel",
                    "臺灣",
                    "台灣手機",
                    "行動電話",
                ]),
        );

        // Landlines: area code 0X..0XXX plus 6-8 digits, never 09
        self.add(
            RecognizerDefinition::new(TW_HOME_NUMBER, "")
                .with_pattern(
                    "tw_home_parenthesized",
                    r"\(\s?0[0-9]{1,3}\s?\)\s?[0-9]{6,8}\b",
                    0.80,
                )
                .with_pattern(
                    "tw_home_dash_or_space",
                    r"\b0[0-9]{1,3}[-\s]?[0-9]{6,8}\b",
                    0.80,
                )
                .with_pattern(
                    "tw_home_intl",
                    r"\+886\s?(?:[2-8]|[2-8][0-9]|[0-9]{2})\s?[0-9]{6,8}\b",
                    0.80,
                )
                .with_validator(validate_landline)
                .with_context(&["市話", "電話", "tel", "phone", "landline"]),
        );

        // MAC addresses, colon/dash and Cisco dotted forms
        self.add(
            RecognizerDefinition::new(MAC_ADDRESS, "")
                .with_pattern(
                    "mac_colon_or_dash",
                    r"\b[0-9A-Fa-f]{2}(?:[:-][0-9A-Fa-f]{2}){5}\b",
                    0.90,
                )
                .with_pattern(
                    "mac_cisco_dotted",
                    r"\b(?:[0-9A-Fa-f]{4}\.){2}[0-9A-Fa-f]{4}\b",
                    0.90,
                )
                .with_validator(validate_mac)
                .with_enhancer(enhance_mac)
                .with_context(&["MAC", "網卡", "乙太網路", "Ethernet"]),
        );

        // Health insurance card: low base score, lifted by context
        self.add(
            RecognizerDefinition::new(TW_NHI_NUMBER, "")
                .with_pattern("tw_nhi_12_digits", r"\b0000[0-9]{8}\b", 0.51)
                .with_context(&["健保", "健保卡", "NHI", "NHIC", "健康保險", "health insurance"]),
        );
    }

    fn init_generic_recognizers(&mut self) {
        self.add(
            RecognizerDefinition::new(EMAIL_ADDRESS, "")
                .with_pattern(
                    "email",
                    r"\b[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}\b",
                    0.95,
                )
                .with_context(&["email", "e-mail", "mail"]),
        );

        self.add(
            RecognizerDefinition::new(PHONE_NUMBER, "")
                .with_pattern(
                    "phone_us",
                    r"(?:\+1[-.\s]?)?\(?[0-9]{3}\)?[-.\s][0-9]{3}[-.\s][0-9]{4}\b",
                    0.70,
                )
                .with_pattern(
                    "phone_international",
                    r"\+[0-9]{1,3}[-.\s]?[0-9]{1,4}(?:[-.\s]?[0-9]{2,4}){2,4}\b",
                    0.70,
                )
                .with_context(&["phone", "number", "telephone", "cell", "mobile", "call", "tel"]),
        );

        self.add(
            RecognizerDefinition::new(US_SSN, "")
                .with_pattern("ssn", r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b", 0.85)
                .with_context(&["social", "security", "ssn"]),
        );

        self.add(
            RecognizerDefinition::new(IP_ADDRESS, "")
                .with_pattern(
                    "ipv4",
                    r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
                    0.60,
                )
                .with_context(&["ip", "ipv4", "address"]),
        );

        self.add(
            RecognizerDefinition::new(CREDIT_CARD, "")
                .with_pattern(
                    "credit_card",
                    r"\b(?:4[0-9]{3}|5[1-5][0-9]{2}|3[47][0-9]{2}|6(?:011|5[0-9]{2}))[-\s]?[0-9]{4}[-\s]?[0-9]{4}[-\s]?[0-9]{3,4}\b",
                    0.80,
                )
                .with_validator(validate_luhn)
                .with_context(&["credit", "card", "visa", "mastercard"]),
        );

        self.add(
            RecognizerDefinition::new(URL, "")
                .with_pattern(
                    "url",
                    r"\bhttps?://[A-Za-z0-9\-._~:/?#@!$&*+,;=%]*[A-Za-z0-9/]",
                    0.60,
                )
                .with_context(&["url", "website", "link"]),
        );

        self.add(
            RecognizerDefinition::new(DATE_TIME, "")
                .with_pattern(
                    "date_iso",
                    r"\b(?:19|20)[0-9]{2}[-/.](?:0?[1-9]|1[0-2])[-/.](?:0?[1-9]|[12][0-9]|3[01])\b",
                    0.60,
                )
                .with_pattern(
                    "date_slash",
                    r"\b[0-9]{1,2}/[0-9]{1,2}/(?:19|20)[0-9]{2}\b",
                    0.60,
                )
                .with_context(&["date", "birthday", "dob", "born", "生日", "出生"]),
        );
    }
}

impl Default for PatternRecognizerRegistry {
    fn default() -> Self {
        Self::new(&["en".to_string(), "zh".to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PatternEngine;

    #[test]
    fn test_business_number_checksum() {
        assert!(validate_business_number("04595257"));
        assert!(validate_business_number("10458575"));
        assert!(!validate_business_number("12345678"));
        assert!(!validate_business_number("1234567"));
        assert!(!validate_business_number("1234567a"));
    }

    #[test]
    fn test_business_number_seventh_digit_rule() {
        // 7th digit 7 -> product 28; a total one short of 30 passes
        assert!(validate_business_number("10458574"));
        assert!(!validate_business_number("10458570"));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_mac("0000.0000.0000"), "00:00:00:00:00:00");
        assert_eq!(normalize_mac("aabb.ccdd.eeff"), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_validate_mac_separators() {
        assert!(validate_mac("aa:bb:cc:dd:ee:ff"));
        assert!(validate_mac("aabb.ccdd.eeff"));
        assert!(!validate_mac("aa:bb-cc:dd:ee:ff"));
    }

    #[test]
    fn test_luhn() {
        assert!(validate_luhn("4111 1111 1111 1111"));
        assert!(!validate_luhn("4111 1111 1111 1112"));
    }

    #[test]
    fn test_definitions_duplicated_per_language() {
        let registry = PatternRecognizerRegistry::default();
        let definitions = registry.definitions();

        let en = definitions.iter().filter(|d| d.language == "en").count();
        let zh = definitions.iter().filter(|d| d.language == "zh").count();
        assert_eq!(en, zh);
        assert_eq!(en, 7);
        assert!(definitions
            .iter()
            .any(|d| d.entity_type == MAC_ADDRESS && d.language == "zh"));
    }

    #[test]
    fn test_register_is_idempotent() {
        let registry = PatternRecognizerRegistry::default();
        let mut engine = PatternEngine::new();

        let first = registry.register(&mut engine).unwrap();
        let second = registry.register(&mut engine).unwrap();

        assert_eq!(first, 14);
        assert_eq!(second, 0);
        assert_eq!(engine.recognizers().len(), 14);
    }

    #[test]
    fn test_business_number_soft_reject() {
        let registry = PatternRecognizerRegistry::default();
        let mut engine = PatternEngine::new().with_threshold(0.0);
        registry.register(&mut engine).unwrap();

        let spans = engine.analyze("統編 04595257 與 12345678", "zh").unwrap();
        let ubn: Vec<_> = spans
            .iter()
            .filter(|s| s.entity_type == UNIFIED_BUSINESS_NO)
            .collect();

        assert_eq!(ubn.len(), 2);
        let valid = ubn.iter().find(|s| s.raw_text == "04595257").unwrap();
        let invalid = ubn.iter().find(|s| s.raw_text == "12345678").unwrap();
        assert!(valid.score >= 0.90);
        assert!(invalid.score <= SOFT_REJECT_SCORE);
    }

    #[test]
    fn test_placeholder_mac_is_down_weighted() {
        let registry = PatternRecognizerRegistry::default();
        let mut engine = PatternEngine::new().with_threshold(0.0);
        registry.register(&mut engine).unwrap();

        let spans = engine
            .analyze("MAC 00:00:00:00:00:00 and 3c:22:fb:12:9a:01", "en")
            .unwrap();
        let placeholder = spans
            .iter()
            .find(|s| s.raw_text == "00:00:00:00:00:00")
            .unwrap();
        let real = spans
            .iter()
            .find(|s| s.raw_text == "3c:22:fb:12:9a:01")
            .unwrap();

        assert!(placeholder.score <= SOFT_REJECT_SCORE);
        assert!(real.score >= 0.90);
    }

    #[test]
    fn test_landline_rejects_mobile_prefix() {
        let registry = PatternRecognizerRegistry::default();
        let mut engine = PatternEngine::new();
        registry.register(&mut engine).unwrap();

        let spans = engine.analyze("call 0912345678 or 02-23456789", "en").unwrap();
        assert!(spans
            .iter()
            .all(|s| !(s.entity_type == TW_HOME_NUMBER && s.raw_text.starts_with("09"))));
        assert!(spans
            .iter()
            .any(|s| s.entity_type == TW_HOME_NUMBER && s.raw_text == "02-23456789"));
        assert!(spans
            .iter()
            .any(|s| s.entity_type == TW_PHONE_NUMBER && s.raw_text == "0912345678"));
    }
}
