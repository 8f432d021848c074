//! Overlap resolution
//!
//! Turns raw, possibly overlapping candidates into a disjoint list using a
//! per-type priority table, then confidence, then input order.

use std::collections::HashMap;

use anon_core::entity::{
    DATE_TIME, DURATION_TIME, EMAIL_ADDRESS, LOCATION, ORGANIZATION, PERSON, PHONE_NUMBER,
    TW_HOME_NUMBER, TW_PHONE_NUMBER, UNIFIED_BUSINESS_NO,
};
use anon_core::{EntitySpan, ResolverConfig};

/// Built-in priorities; lower wins
const DEFAULT_PRIORITIES: &[(&str, u32)] = &[
    (PHONE_NUMBER, 1),
    (TW_PHONE_NUMBER, 1),
    (DURATION_TIME, 1),
    (UNIFIED_BUSINESS_NO, 1),
    (EMAIL_ADDRESS, 1),
    (PERSON, 1),
    (DATE_TIME, 2),
    (TW_HOME_NUMBER, 2),
    (LOCATION, 2),
    (ORGANIZATION, 3),
];

/// Result of a resolution pass
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Disjoint spans sorted by start
    pub spans: Vec<EntitySpan>,
    /// Malformed inputs that were skipped
    pub malformed: usize,
    /// Inputs under the minimum score
    pub below_threshold: usize,
    /// Well-formed inputs that lost an overlap
    pub overlapped: usize,
}

impl Resolution {
    /// Inputs excluded before ranking
    pub fn dropped(&self) -> usize {
        self.malformed + self.below_threshold
    }
}

/// Priority-driven overlap resolver
#[derive(Debug, Clone)]
pub struct OverlapResolver {
    priorities: HashMap<String, u32>,
    default_priority: u32,
    min_score: f32,
}

impl OverlapResolver {
    /// Build a resolver; configured priorities are merged over the defaults
    pub fn new(config: &ResolverConfig) -> Self {
        let mut priorities: HashMap<String, u32> = DEFAULT_PRIORITIES
            .iter()
            .map(|(t, p)| (t.to_string(), *p))
            .collect();
        for (entity_type, priority) in &config.priorities {
            priorities.insert(anon_core::normalize_entity_type(entity_type), *priority);
        }

        Self {
            priorities,
            default_priority: config.default_priority,
            min_score: config.min_score,
        }
    }

    /// Priority of a normalized entity type
    pub fn priority(&self, entity_type: &str) -> u32 {
        self.priorities
            .get(entity_type)
            .copied()
            .unwrap_or(self.default_priority)
    }

    /// Resolve `spans` against `text`, returning only the accepted spans
    pub fn resolve(&self, text: &str, spans: &[EntitySpan]) -> Vec<EntitySpan> {
        self.resolve_with_stats(text, spans).spans
    }

    /// Resolve `spans` against `text` and report what was discarded
    pub fn resolve_with_stats(&self, text: &str, spans: &[EntitySpan]) -> Resolution {
        let mut resolution = Resolution::default();

        let mut candidates: Vec<(usize, EntitySpan)> = Vec::with_capacity(spans.len());
        for (index, span) in spans.iter().enumerate() {
            let check = span.check(text);
            if !check.is_valid() {
                tracing::warn!(
                    entity_type = %span.entity_type,
                    start = span.start,
                    end = span.end,
                    text_len = text.len(),
                    reason = check.reason(),
                    "Skipping malformed span"
                );
                resolution.malformed += 1;
                continue;
            }
            if span.score < self.min_score {
                resolution.below_threshold += 1;
                continue;
            }
            candidates.push((index, span.rehydrate(text)));
        }

        // Stable ordering: priority, then confidence, then input order
        candidates.sort_by(|(ia, a), (ib, b)| {
            self.priority(&a.entity_type)
                .cmp(&self.priority(&b.entity_type))
                .then(b.score.total_cmp(&a.score))
                .then(ia.cmp(ib))
        });

        let mut accepted: Vec<EntitySpan> = Vec::new();
        for (_, span) in candidates {
            if accepted.iter().any(|kept| kept.overlaps(&span)) {
                resolution.overlapped += 1;
            } else {
                accepted.push(span);
            }
        }

        accepted.sort_by_key(|s| s.start);

        tracing::debug!(
            accepted = accepted.len(),
            malformed = resolution.malformed,
            below_threshold = resolution.below_threshold,
            overlapped = resolution.overlapped,
            "Resolved overlapping spans"
        );

        resolution.spans = accepted;
        resolution
    }
}

impl Default for OverlapResolver {
    fn default() -> Self {
        Self::new(&ResolverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_priority_beats_score() {
        let text = "Acme Corp Taipei";
        let spans = vec![
            EntitySpan::new("ORGANIZATION", 0, 9, 0.99, ""),
            EntitySpan::new("PERSON", 0, 4, 0.6, ""),
        ];

        let resolved = OverlapResolver::default().resolve(text, &spans);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].entity_type, "PERSON");
        assert_eq!(resolved[0].raw_text, "Acme");
    }

    #[test]
    fn test_score_then_order_break_ties() {
        let text = "0912345678";
        let spans = vec![
            EntitySpan::new("TW_PHONE_NUMBER", 0, 10, 0.85, ""),
            EntitySpan::new("PHONE_NUMBER", 0, 10, 0.90, ""),
            EntitySpan::new("PHONE_NUMBER", 0, 10, 0.90, "first-wins"),
        ];

        let resolved = OverlapResolver::default().resolve(text, &spans);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].entity_type, "PHONE_NUMBER");
    }

    #[test]
    fn test_malformed_and_low_score_dropped() {
        let text = "王小明 john@example.com";
        let spans = vec![
            EntitySpan::new("PERSON", 1, 9, 0.9, ""),
            EntitySpan::new("PERSON", 5, 3, 0.9, ""),
            EntitySpan::new("PERSON", 0, 200, 0.9, ""),
            EntitySpan::new("PERSON", 0, 9, 0.3, ""),
            EntitySpan::new("email", 10, 26, 0.95, ""),
        ];

        let resolution = OverlapResolver::default().resolve_with_stats(text, &spans);
        assert_eq!(resolution.malformed, 3);
        assert_eq!(resolution.below_threshold, 1);
        assert_eq!(resolution.dropped(), 4);
        assert_eq!(resolution.spans.len(), 1);
        assert_eq!(resolution.spans[0].entity_type, "EMAIL_ADDRESS");
        assert_eq!(resolution.spans[0].raw_text, "john@example.com");
    }

    #[test]
    fn test_output_sorted_by_start() {
        let text = "a@b.co and 02-23456789";
        let spans = vec![
            EntitySpan::new("TW_HOME_NUMBER", 11, 22, 0.8, ""),
            EntitySpan::new("EMAIL_ADDRESS", 0, 6, 0.95, ""),
        ];

        let resolved = OverlapResolver::default().resolve(text, &spans);
        assert_eq!(resolved[0].start, 0);
        assert_eq!(resolved[1].start, 11);
    }

    #[test]
    fn test_priority_override() {
        let mut config = ResolverConfig::default();
        config.priorities.insert("organization".to_string(), 0);
        let resolver = OverlapResolver::new(&config);

        assert_eq!(resolver.priority("ORGANIZATION"), 0);
        assert_eq!(resolver.priority("PERSON"), 1);
        assert_eq!(resolver.priority("MAC_ADDRESS"), 99);

        let spans = vec![
            EntitySpan::new("PERSON", 0, 4, 0.9, ""),
            EntitySpan::new("ORGANIZATION", 0, 9, 0.6, ""),
        ];
        let resolved = resolver.resolve("Acme Corp", &spans);
        assert_eq!(resolved[0].entity_type, "ORGANIZATION");
    }

    fn arb_spans() -> impl Strategy<Value = Vec<(u8, usize, usize, f32)>> {
        prop::collection::vec((0u8..6, 0usize..60, 0usize..20, 0.0f32..1.0), 0..40)
    }

    proptest! {
        #[test]
        fn prop_resolved_spans_are_disjoint(raw in arb_spans()) {
            const TYPES: [&str; 6] =
                ["PERSON", "ORGANIZATION", "LOCATION", "PHONE_NUMBER", "DATE_TIME", "URL"];
            let text = "x".repeat(64);
            let spans: Vec<EntitySpan> = raw
                .iter()
                .map(|(t, start, len, score)| {
                    EntitySpan::new(TYPES[*t as usize], *start, start + len, *score, "")
                })
                .collect();

            let resolved = OverlapResolver::default().resolve(&text, &spans);

            for pair in resolved.windows(2) {
                prop_assert!(pair[0].end <= pair[1].start);
            }
            for span in &resolved {
                prop_assert!(span.score >= 0.5);
                prop_assert!(span.start < span.end && span.end <= text.len());
            }
        }

        #[test]
        fn prop_higher_priority_never_loses_to_overlap(
            person_start in 0usize..30,
            org_start in 0usize..30,
            len in 1usize..20,
        ) {
            let text = "y".repeat(64);
            let spans = vec![
                EntitySpan::new("ORGANIZATION", org_start, org_start + len, 0.99, ""),
                EntitySpan::new("PERSON", person_start, person_start + len, 0.51, ""),
            ];

            let resolved = OverlapResolver::default().resolve(&text, &spans);
            prop_assert!(resolved.iter().any(|s| s.entity_type == "PERSON"));
        }
    }
}
