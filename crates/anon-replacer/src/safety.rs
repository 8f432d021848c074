//! Post-reconstruction safety net
//!
//! Re-scans the substituted text for email-, SSN- and phone-shaped strings
//! the recognizers missed. Regions already replaced or deliberately skipped
//! are protected so their values stay consistent with the cache.

use std::ops::Range;
use std::sync::LazyLock;

use anon_core::entity::{EMAIL_ADDRESS, PHONE_NUMBER, US_SSN};
use anon_core::EntitySpan;
use regex::Regex;

/// Minimum digits for a phone-shaped match
const MIN_PHONE_DIGITS: usize = 7;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").unwrap());

static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b").unwrap());

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?[0-9][0-9\-\s().]{6,}[0-9]").unwrap());

/// Scan `text` for leftovers outside `protected` ranges. Returned spans are
/// disjoint and sorted by start.
///
/// Patterns run on each unprotected gap separately, so a match can never
/// straddle a replaced region and hide a leftover next to it.
pub fn scan(text: &str, protected: &[Range<usize>]) -> Vec<EntitySpan> {
    let patterns: [(&str, &Regex); 3] = [
        (EMAIL_ADDRESS, &EMAIL_RE),
        (US_SSN, &SSN_RE),
        (PHONE_NUMBER, &PHONE_RE),
    ];
    let gaps = gaps(text, protected);

    let mut found: Vec<EntitySpan> = Vec::new();
    for (entity_type, regex) in patterns {
        for gap in &gaps {
            let slice = &text[gap.clone()];
            for mat in regex.find_iter(slice) {
                let range = (gap.start + mat.start())..(gap.start + mat.end());
                if found
                    .iter()
                    .any(|s| s.start < range.end && range.start < s.end)
                {
                    continue;
                }

                if entity_type == PHONE_NUMBER
                    && mat.as_str().chars().filter(char::is_ascii_digit).count() < MIN_PHONE_DIGITS
                {
                    continue;
                }

                found.push(EntitySpan::new(
                    entity_type,
                    range.start,
                    range.end,
                    1.0,
                    mat.as_str(),
                ));
            }
        }
    }

    found.sort_by_key(|s| s.start);
    found
}

/// Byte ranges of `text` not covered by any `protected` range
fn gaps(text: &str, protected: &[Range<usize>]) -> Vec<Range<usize>> {
    let mut covered: Vec<Range<usize>> = protected
        .iter()
        .filter(|r| r.start < r.end)
        .map(|r| r.start.min(text.len())..r.end.min(text.len()))
        .collect();
    covered.sort_by_key(|r| r.start);

    let mut gaps = Vec::with_capacity(covered.len() + 1);
    let mut cursor = 0;
    for range in covered {
        if range.start > cursor {
            gaps.push(cursor..range.start);
        }
        cursor = cursor.max(range.end);
    }
    if cursor < text.len() {
        gaps.push(cursor..text.len());
    }
    gaps
}
