//! Replacement orchestration
//!
//! Each resolved span moves through
//! `DETECTED -> {CACHE_HIT | LOCAL_RULE | SKIPPED | NEEDS_REMOTE} -> RESOLVED`.
//! Spans needing the remote generator are batched; every remote failure
//! degrades to locally generated values so a run always completes.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use anon_core::{
    AnonError, AnonymizationReport, AppConfig, DecisionRecord, EntitySpan, LlmClient, LlmConfig,
    ReplacementOrigin, ResolvedSpan,
};
use serde::Serialize;

use crate::batch::{self, LineVerdict, ReplacementBatchItem, SYSTEM_PROMPT};
use crate::cache::{CacheStatsReport, MappingCache};
use crate::generator::SyntheticValueGenerator;
use crate::rules::SkipRules;
use crate::safety;

// ============================================================================
// Retry policy
// ============================================================================

/// Timeout and exponential backoff applied to remote calls
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Budget per attempt
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .max(1.0)
            .powi(attempt.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor).min(self.max_backoff)
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&LlmConfig::default())
    }
}

/// Result of one remote batch call
#[derive(Debug)]
pub enum RemoteOutcome {
    /// Cleaned, non-empty response lines
    Lines(Vec<String>),
    /// Every attempt failed
    Failed(AnonError),
}

// ============================================================================
// Outcome
// ============================================================================

/// Result of anonymizing one text
#[derive(Debug, Clone, Serialize)]
pub struct AnonymizationOutcome {
    /// Substituted text
    pub text: String,
    /// Input spans with their replacements, sorted by start
    pub resolved: Vec<ResolvedSpan>,
    pub report: AnonymizationReport,
    /// Mapping cache counters since the cache was opened
    pub cache_stats: CacheStatsReport,
}

/// Splice replacements into `text`, right to left. Spans must be valid for
/// `text` and disjoint. Returns the new text and the output range of each
/// span, in start order.
pub fn splice(text: &str, resolved: &[ResolvedSpan]) -> (String, Vec<Range<usize>>) {
    let mut order: Vec<&ResolvedSpan> = resolved.iter().collect();
    order.sort_by(|a, b| b.span.start.cmp(&a.span.start));

    let mut out = text.to_string();
    for r in &order {
        out.replace_range(r.span.start..r.span.end, &r.replacement);
    }

    // Output positions, left to right
    let mut ranges: Vec<Range<usize>> = Vec::with_capacity(order.len());
    let mut shift: isize = 0;
    for r in order.iter().rev() {
        let start = (r.span.start as isize + shift) as usize;
        let end = start + r.replacement.len();
        shift += r.replacement.len() as isize - r.span.len() as isize;
        ranges.push(start..end);
    }

    (out, ranges)
}

// ============================================================================
// Orchestrator
// ============================================================================

/// One distinct `(type, raw)` pair queued for remote generation and the
/// span indices waiting on it
struct PendingItem {
    item: ReplacementBatchItem,
    members: Vec<usize>,
}

/// Turns resolved spans into substituted text
pub struct ReplacementOrchestrator {
    cache: MappingCache,
    generator: SyntheticValueGenerator,
    client: Option<Arc<dyn LlmClient>>,
    retry: RetryPolicy,
    rules: SkipRules,
    local_types: Vec<String>,
    batch_size: usize,
    context_radius: usize,
    safety_net: bool,
}

impl ReplacementOrchestrator {
    pub fn new(
        config: &AppConfig,
        cache: MappingCache,
        generator: SyntheticValueGenerator,
        client: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        let replacement = &config.replacement;
        Self {
            cache,
            generator,
            client,
            retry: RetryPolicy::from(&config.llm),
            rules: SkipRules::new(replacement),
            local_types: replacement
                .local_types
                .iter()
                .map(|t| anon_core::normalize_entity_type(t))
                .collect(),
            batch_size: replacement.batch_size.max(1),
            context_radius: replacement.context_radius,
            safety_net: replacement.safety_net,
        }
    }

    /// Override the remote timeout and backoff
    pub fn set_retry_policy(&mut self, retry: RetryPolicy) {
        self.retry = retry;
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cache(&self) -> &MappingCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut MappingCache {
        &mut self.cache
    }

    /// Anonymize `text` given disjoint resolved `spans`
    pub async fn anonymize(&mut self, text: &str, spans: &[EntitySpan]) -> AnonymizationOutcome {
        let mut report = AnonymizationReport::new();
        let spans = self.prepare(text, spans, &mut report);

        let mut resolved: Vec<Option<ResolvedSpan>> = vec![None; spans.len()];
        let mut pending: Vec<PendingItem> = Vec::new();
        let mut queued: HashMap<(String, String), usize> = HashMap::new();

        for (idx, span) in spans.iter().enumerate() {
            if let Some(value) = self.cache.get(&span.entity_type, &span.raw_text) {
                resolved[idx] = Some(ResolvedSpan::new(
                    span.clone(),
                    value,
                    ReplacementOrigin::CacheHit,
                ));
                continue;
            }

            if let Some(reason) = self.rules.skip_reason(&span.entity_type, &span.raw_text) {
                tracing::debug!(
                    entity_type = %span.entity_type,
                    start = span.start,
                    reason = reason.as_str(),
                    "Span left in place"
                );
                resolved[idx] = Some(ResolvedSpan::skipped(span.clone()));
                continue;
            }

            if self.local_types.contains(&span.entity_type) {
                let value = self.generator.generate(&span.entity_type, &span.raw_text);
                let value = self.cache.put(&span.entity_type, &span.raw_text, &value);
                resolved[idx] = Some(ResolvedSpan::new(
                    span.clone(),
                    value,
                    ReplacementOrigin::LocalRule,
                ));
                continue;
            }

            let key = (span.entity_type.clone(), span.raw_text.clone());
            match queued.get(&key) {
                Some(&slot) => pending[slot].members.push(idx),
                None => {
                    queued.insert(key, pending.len());
                    pending.push(PendingItem {
                        item: ReplacementBatchItem::new(
                            pending.len(),
                            span,
                            text,
                            self.context_radius,
                        ),
                        members: vec![idx],
                    });
                }
            }
        }

        for chunk in pending.chunks(self.batch_size) {
            let values = self.resolve_batch(chunk, &mut report).await;
            for (pending_item, (value, origin)) in chunk.iter().zip(values) {
                for &idx in &pending_item.members {
                    resolved[idx] = Some(ResolvedSpan::new(spans[idx].clone(), value.clone(), origin));
                }
            }
        }

        let resolved: Vec<ResolvedSpan> = resolved.into_iter().flatten().collect();
        for r in &resolved {
            report.record(DecisionRecord::from_resolved(r));
        }

        let (mut output, protected) = splice(text, &resolved);

        if self.safety_net {
            output = self.apply_safety_net(output, &protected, &mut report);
        }

        report.finish();
        tracing::info!(
            run_id = %report.run_id,
            spans = resolved.len(),
            cache_hit = report.counts.cache_hit,
            local_rule = report.counts.local_rule,
            remote = report.counts.remote,
            remote_fallback = report.counts.remote_fallback,
            skipped = report.counts.skipped,
            safety_net = report.safety_net_hits(),
            "Anonymization complete"
        );

        AnonymizationOutcome {
            text: output,
            resolved,
            report,
            cache_stats: self.cache.stats_report(),
        }
    }

    /// Validate offsets, rehydrate raw text and drop overlaps
    fn prepare(
        &self,
        text: &str,
        spans: &[EntitySpan],
        report: &mut AnonymizationReport,
    ) -> Vec<EntitySpan> {
        let mut valid: Vec<EntitySpan> = Vec::with_capacity(spans.len());
        for span in spans {
            let check = span.check(text);
            if !check.is_valid() {
                tracing::warn!(
                    entity_type = %span.entity_type,
                    start = span.start,
                    end = span.end,
                    reason = check.reason(),
                    "Skipping malformed span"
                );
                report.dropped_spans += 1;
                continue;
            }
            valid.push(span.rehydrate(text));
        }

        valid.sort_by_key(|s| s.start);

        let mut disjoint: Vec<EntitySpan> = Vec::with_capacity(valid.len());
        for span in valid {
            if disjoint.last().is_some_and(|prev| prev.overlaps(&span)) {
                tracing::warn!(
                    entity_type = %span.entity_type,
                    start = span.start,
                    end = span.end,
                    "Skipping overlapping span"
                );
                report.dropped_spans += 1;
                continue;
            }
            disjoint.push(span);
        }

        disjoint
    }

    /// Resolve one batch, returning a value and origin per pending item
    async fn resolve_batch(
        &mut self,
        chunk: &[PendingItem],
        report: &mut AnonymizationReport,
    ) -> Vec<(String, ReplacementOrigin)> {
        let items: Vec<ReplacementBatchItem> = chunk.iter().map(|p| p.item.clone()).collect();

        let lines = match self.client.clone() {
            Some(client) => {
                report.remote_batches += 1;
                let prompt = batch::build_user_prompt(&items);

                match self.call_remote(client.as_ref(), &prompt).await {
                    RemoteOutcome::Lines(lines) => Some(lines),
                    RemoteOutcome::Failed(e) => {
                        tracing::warn!(
                            client = client.name(),
                            batch_len = items.len(),
                            error = %e,
                            "Remote generation failed, using local fallback"
                        );
                        report.remote_failures += 1;
                        None
                    }
                }
            }
            None => None,
        };

        let mut values = Vec::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            let verdict = match &lines {
                Some(lines) => batch::validate_line(item, lines.get(pos).map(String::as_str)),
                None => LineVerdict::Rejected("no remote"),
            };

            let (value, origin) = match verdict {
                LineVerdict::Accepted(value) => (value, ReplacementOrigin::Remote),
                LineVerdict::Rejected(reason) => {
                    if lines.is_some() {
                        tracing::debug!(
                            entity_type = %item.entity_type,
                            sequence_index = item.sequence_index,
                            reason,
                            "Remote value rejected"
                        );
                    }
                    let value = self.generator.generate(&item.entity_type, &item.raw_text);
                    (value, ReplacementOrigin::RemoteFallback)
                }
            };

            let value = self.cache.put(&item.entity_type, &item.raw_text, &value);
            values.push((value, origin));
        }

        values
    }

    /// Call the remote client with a per-attempt timeout and exponential
    /// backoff between attempts
    async fn call_remote(&self, client: &dyn LlmClient, prompt: &str) -> RemoteOutcome {
        let attempts = self.retry.max_retries + 1;
        let mut attempt = 1;

        loop {
            let error = match tokio::time::timeout(
                self.retry.timeout,
                client.chat(SYSTEM_PROMPT, prompt),
            )
            .await
            {
                Ok(Ok(response)) => {
                    let lines = batch::parse_response(&response);
                    if !lines.is_empty() {
                        return RemoteOutcome::Lines(lines);
                    }
                    AnonError::RemoteError("Empty response".to_string())
                }
                Ok(Err(e)) => e,
                Err(_) => AnonError::Timeout(self.retry.timeout.as_secs()),
            };

            if attempt >= attempts {
                return RemoteOutcome::Failed(error);
            }

            let delay = self.retry.backoff(attempt);
            tracing::warn!(
                client = client.name(),
                attempt,
                max_attempts = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Remote call failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Replace PII-shaped leftovers outside `protected` output ranges
    fn apply_safety_net(
        &mut self,
        output: String,
        protected: &[Range<usize>],
        report: &mut AnonymizationReport,
    ) -> String {
        let leftovers = safety::scan(&output, protected);
        if leftovers.is_empty() {
            return output;
        }

        let mut fixes = Vec::with_capacity(leftovers.len());
        for span in leftovers {
            let resolved = match self.cache.get(&span.entity_type, &span.raw_text) {
                Some(value) => ResolvedSpan::new(span, value, ReplacementOrigin::CacheHit),
                None => {
                    let value = self.generator.generate(&span.entity_type, &span.raw_text);
                    let value = self.cache.put(&span.entity_type, &span.raw_text, &value);
                    ResolvedSpan::new(span, value, ReplacementOrigin::LocalRule)
                }
            };

            tracing::debug!(
                entity_type = %resolved.span.entity_type,
                start = resolved.span.start,
                len = resolved.span.len(),
                "Safety net replacement"
            );
            report.record(DecisionRecord {
                safety_net: true,
                ..DecisionRecord::from_resolved(&resolved)
            });
            fixes.push(resolved);
        }

        splice(&output, &fixes).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(750));
        assert_eq!(policy.backoff(20), Duration::from_millis(5_000));
    }

    #[test]
    fn test_splice_ranges() {
        let text = "Hi John, mail j@x.io";
        let resolved = vec![
            ResolvedSpan::new(
                EntitySpan::from_text("PERSON", 3, 7, 0.9, text).unwrap(),
                "Alexander",
                ReplacementOrigin::Remote,
            ),
            ResolvedSpan::new(
                EntitySpan::from_text("EMAIL_ADDRESS", 14, 20, 0.9, text).unwrap(),
                "k@y.io",
                ReplacementOrigin::LocalRule,
            ),
        ];

        let (out, ranges) = splice(text, &resolved);
        assert_eq!(out, "Hi Alexander, mail k@y.io");
        assert_eq!(&out[ranges[0].clone()], "Alexander");
        assert_eq!(&out[ranges[1].clone()], "k@y.io");
    }

    proptest! {
        #[test]
        fn prop_splice_length_identity(
            cuts in prop::collection::btree_set(0usize..40, 0..12),
            replacement_lens in prop::collection::vec(0usize..10, 6),
        ) {
            let text = "abcdefghijklmnopqrstuvwxyz0123456789ABCD";
            let cuts: Vec<usize> = cuts.into_iter().collect();
            let resolved: Vec<ResolvedSpan> = cuts
                .chunks_exact(2)
                .enumerate()
                .map(|(i, pair)| {
                    let span = EntitySpan::from_text("CUSTOM", pair[0], pair[1], 0.9, text).unwrap();
                    let replacement = "z".repeat(replacement_lens[i % replacement_lens.len()]);
                    ResolvedSpan::new(span, replacement, ReplacementOrigin::LocalRule)
                })
                .collect();

            let (out, ranges) = splice(text, &resolved);

            let expected = text.len() as isize
                + resolved
                    .iter()
                    .map(|r| r.replacement.len() as isize - r.span.len() as isize)
                    .sum::<isize>();
            prop_assert_eq!(out.len() as isize, expected);
            for (r, range) in resolved.iter().zip(&ranges) {
                prop_assert_eq!(&out[range.clone()], r.replacement.as_str());
            }
        }
    }
}
