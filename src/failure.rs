//! Failure analysis: classify a run's failed attempts and suggest follow-ups.
//! Purely descriptive; no side effects.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::ErrorKind;
use crate::orchestrator::AttemptResult;
use crate::source::SourceType;

pub const TIMEOUT_ADVISORY_RATE: f32 = 0.3;
pub const TYPE_DOMINANCE_RATE: f32 = 0.4;
pub const RATE_LIMIT_DOMINANCE_RATE: f32 = 0.4;
pub const REGION_DOMINANCE_RATE: f32 = 0.5;

/// Aggregate over one run's failed attempts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FailurePattern {
    pub total_failed: usize,
    pub error_kinds: BTreeMap<ErrorKind, usize>,
    /// Coarse bucket of each failure message (rate_limited, network, ...).
    pub error_categories: BTreeMap<String, usize>,
    pub timeout_rate: f32,
    pub by_source_type: BTreeMap<SourceType, usize>,
    pub by_region: BTreeMap<String, usize>,
    pub recommendations: Vec<String>,
}

impl FailurePattern {
    pub fn is_empty(&self) -> bool {
        self.total_failed == 0
    }
}

/// Bucket a failure message.
pub fn categorize(kind: ErrorKind, message: &str) -> &'static str {
    if kind == ErrorKind::AttemptTimeout {
        return "timeout";
    }
    let m = message.to_ascii_lowercase();
    if m.contains("429") || m.contains("rate limit") || m.contains("too many requests") {
        "rate_limited"
    } else if m.contains("404") || m.contains("not found") {
        "not_found"
    } else if m.contains("network") || m.contains("connect") || m.contains("dns") || m.contains("reset") {
        "network"
    } else if m.contains("parse") || m.contains("json") || m.contains("decode") {
        "parse"
    } else {
        "other"
    }
}

fn dominant<K: Clone>(counts: &BTreeMap<K, usize>, total: usize) -> Option<(K, f32)> {
    counts
        .iter()
        .max_by_key(|(_, n)| **n)
        .map(|(k, n)| (k.clone(), *n as f32 / total as f32))
}

/// Summarize the failed subset of `attempts`. `total_attempts` is the run's
/// attempt count (successes included), used for the all-failed advisory.
pub fn analyze_failures(attempts: &[AttemptResult], total_attempts: usize) -> FailurePattern {
    let failed: Vec<&AttemptResult> = attempts.iter().filter(|a| !a.success).collect();
    let mut pattern = FailurePattern {
        total_failed: failed.len(),
        ..FailurePattern::default()
    };
    if failed.is_empty() {
        return pattern;
    }

    let mut timeouts = 0usize;
    for a in &failed {
        let (kind, message) = match &a.error {
            Some(e) => (e.kind, e.message.as_str()),
            None => (ErrorKind::AttemptError, ""),
        };
        if kind == ErrorKind::AttemptTimeout {
            timeouts += 1;
        }
        *pattern.error_kinds.entry(kind).or_default() += 1;
        *pattern
            .error_categories
            .entry(categorize(kind, message).to_string())
            .or_default() += 1;
        *pattern.by_source_type.entry(a.source_type).or_default() += 1;
        *pattern.by_region.entry(a.region.to_ascii_lowercase()).or_default() += 1;
    }

    let total = failed.len();
    pattern.timeout_rate = timeouts as f32 / total as f32;

    let mut recs = Vec::new();
    if pattern.timeout_rate > TIMEOUT_ADVISORY_RATE {
        recs.push(format!(
            "{:.0}% of failures were timeouts; consider increasing timeout",
            pattern.timeout_rate * 100.0
        ));
    }
    if let Some((t, ratio)) = dominant(&pattern.by_source_type, total) {
        if ratio > TYPE_DOMINANCE_RATE {
            recs.push(format!(
                "{:.0}% of failures came from {t} sources; review rate limits for that source type",
                ratio * 100.0
            ));
        }
    }
    if let Some(n) = pattern.error_categories.get("rate_limited") {
        if *n as f32 / total as f32 > RATE_LIMIT_DOMINANCE_RATE {
            recs.push("sources are rate limiting requests; slow down or spread queries".to_string());
        }
    }
    if pattern.by_region.len() > 1 {
        if let Some((region, ratio)) = dominant(&pattern.by_region, total) {
            if ratio > REGION_DOMINANCE_RATE {
                recs.push(format!(
                    "failures concentrate in region '{region}'; consider alternative sources there"
                ));
            }
        }
    }
    if total_attempts > 0 && total == total_attempts {
        recs.push("every attempted source failed; check executor connectivity".to_string());
    }
    pattern.recommendations = recs;
    pattern
}
