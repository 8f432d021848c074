//! Routing rules deciding which spans are left untouched
//!
//! Field captions ("Phone", "Date of Birth") are frequently tagged as
//! organizations by statistical NER, and relative time expressions carry
//! no identifying information.

use std::collections::HashSet;
use std::sync::LazyLock;

use anon_core::entity::{DATE, DATE_TIME, TIME};
use anon_core::ReplacementConfig;
use regex::Regex;

const RELATIVE_WORDS: &[&str] = &[
    "today",
    "tomorrow",
    "yesterday",
    "now",
    "tonight",
    "tmr",
    "this morning",
    "this afternoon",
    "this evening",
    "this noon",
    "last night",
    "this week",
    "this month",
    "this year",
    "this quarter",
    "this semester",
    "next week",
    "next month",
    "next year",
    "next quarter",
    "next semester",
    "last week",
    "last month",
    "last year",
    "last quarter",
    "last semester",
    "recently",
    "lately",
    "soon",
    "later",
    "earlier",
    "currently",
    "presently",
    "nowadays",
    "these days",
    "right now",
    "just now",
    "a moment ago",
    "a while ago",
    "in a while",
    "shortly",
];

const RELATIVE_CJK: &[&str] = &[
    "今天", "明天", "昨天", "現在", "今晚", "今夜", "今早", "昨晚", "明晚", "這週", "這個星期",
    "這個月", "今年", "下週", "下個星期", "下個月", "明年", "上週", "上個星期", "上個月", "去年",
    "最近", "近來", "稍後", "等一下", "之前", "之後", "以前", "以後", "目前", "現階段", "當前",
    "剛才", "剛剛", "一會兒", "待會兒",
];

static RELATIVE_WORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    let words = RELATIVE_WORDS
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)\b(?:{words})\b")).unwrap()
});

static RELATIVE_PATTERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:in|within)\s+[0-9]+\s+(?:days?|weeks?|months?|years?)\b
        | \b[0-9]+\s+(?:days?|weeks?|months?|years?)\s+(?:ago|from\ now)\b
        | \bthis\s+(?:coming|past)\s+(?:week|month|year)\b
        | \b(?:next|last)\s+\w*(?:day|week|end)\b
        | \b(?:early|late)\s+(?:this|next|last)\s+(?:week|month|year)\b
        | 幾天[前後內]
        | [0-9]+天[前後內]
        | [下上][週周月年][初中末]",
    )
    .unwrap()
});

/// Whether `raw` is a relative time expression ("tomorrow", "3 days ago",
/// "昨天")
pub fn is_relative_time(raw: &str) -> bool {
    RELATIVE_WORD_RE.is_match(raw)
        || RELATIVE_PATTERN_RE.is_match(raw)
        || RELATIVE_CJK.iter().any(|w| raw.contains(w))
}

/// Why a span is left in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FieldLabel,
    RelativeTime,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FieldLabel => "field_label",
            Self::RelativeTime => "relative_time",
        }
    }
}

/// Skip rules built from replacement settings
#[derive(Debug, Clone)]
pub struct SkipRules {
    whitelist: HashSet<String>,
    label_prone_types: HashSet<String>,
    keep_relative_dates: bool,
}

impl SkipRules {
    pub fn new(config: &ReplacementConfig) -> Self {
        Self {
            whitelist: config
                .field_label_whitelist
                .iter()
                .map(|l| l.trim().to_lowercase())
                .collect(),
            label_prone_types: config
                .label_prone_types
                .iter()
                .map(|t| anon_core::normalize_entity_type(t))
                .collect(),
            keep_relative_dates: config.keep_relative_dates,
        }
    }

    /// Reason to leave `raw` untouched, if any
    pub fn skip_reason(&self, entity_type: &str, raw: &str) -> Option<SkipReason> {
        if self.label_prone_types.contains(entity_type)
            && self.whitelist.contains(&raw.trim().to_lowercase())
        {
            return Some(SkipReason::FieldLabel);
        }

        if self.keep_relative_dates
            && matches!(entity_type, DATE_TIME | DATE | TIME)
            && is_relative_time(raw)
        {
            return Some(SkipReason::RelativeTime);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_time() {
        for raw in [
            "tomorrow",
            "Next Week",
            "3 days ago",
            "in 2 weeks",
            "next weekend",
            "昨天下午",
            "5天後",
            "下月初",
        ] {
            assert!(is_relative_time(raw), "{raw}");
        }

        for raw in ["2023-02-14", "November 3", "14/02/2023", "1990年5月"] {
            assert!(!is_relative_time(raw), "{raw}");
        }
    }

    #[test]
    fn test_field_label_only_for_label_prone_types() {
        let rules = SkipRules::new(&ReplacementConfig::default());

        assert_eq!(
            rules.skip_reason("ORGANIZATION", " Phone "),
            Some(SkipReason::FieldLabel)
        );
        assert_eq!(
            rules.skip_reason("ORGANIZATION", "Date of Birth"),
            Some(SkipReason::FieldLabel)
        );
        assert_eq!(rules.skip_reason("PERSON", "Phone"), None);
        assert_eq!(rules.skip_reason("ORGANIZATION", "Acme Corp"), None);
    }

    #[test]
    fn test_relative_dates_configurable() {
        let rules = SkipRules::new(&ReplacementConfig::default());
        assert_eq!(
            rules.skip_reason("DATE_TIME", "yesterday"),
            Some(SkipReason::RelativeTime)
        );
        assert_eq!(rules.skip_reason("PERSON", "yesterday"), None);

        let config = ReplacementConfig {
            keep_relative_dates: false,
            ..ReplacementConfig::default()
        };
        assert_eq!(SkipRules::new(&config).skip_reason("DATE_TIME", "yesterday"), None);
    }
}
