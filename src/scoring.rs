//! # Scoring Engine
//!
//! Priority score in `[0,1]` for a `(source, query, location)` triple:
//!
//! `score = (w_sr*success + w_rt*speed + w_geo*geo + w_type*type) / Σw`
//!
//! plus an optional learned-affinity bonus `ML_BONUS * ml * (1 - base)`:
//! at most `ML_BONUS`, never negative, never past 1. No clock, no randomness: the same inputs give the same score.
//!
//! `rank_sources` sorts by score and breaks near-ties (within `TIE_EPSILON`)
//! by raw success rate, then by average response time.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::query::{Query, QueryProfile};
use crate::source::{clamp01, SourceRecord, SourceType};

/// Scores closer than this are ordered by the tie-break keys.
pub const TIE_EPSILON: f32 = 0.1;
/// Maximum weight of the learned-affinity term.
pub const ML_BONUS: f32 = 0.2;
/// Response time at (or beyond) which the speed sub-score is 0.
pub const DEFAULT_RESPONSE_TIME_CAP_MS: u64 = 10_000;
/// Location value meaning "no geographic preference".
pub const GLOBAL_LOCATION: &str = "global";

/// Relative weights of the four sub-scores.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriorityWeights {
    #[serde(default = "w_sr")]
    pub success_rate: f32,
    #[serde(default = "w_rt")]
    pub response_time: f32,
    #[serde(default = "w_geo")]
    pub geographic_priority: f32,
    #[serde(default = "w_type")]
    pub source_type: f32,
}

fn w_sr() -> f32 {
    0.4
}
fn w_rt() -> f32 {
    0.3
}
fn w_geo() -> f32 {
    0.2
}
fn w_type() -> f32 {
    0.1
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            success_rate: w_sr(),
            response_time: w_rt(),
            geographic_priority: w_geo(),
            source_type: w_type(),
        }
    }
}

impl PriorityWeights {
    /// Negative or non-finite weights become 0; an all-zero set falls back to defaults.
    pub fn sanitized(self) -> Self {
        fn c(x: f32) -> f32 {
            if x.is_finite() && x > 0.0 {
                x
            } else {
                0.0
            }
        }
        let w = Self {
            success_rate: c(self.success_rate),
            response_time: c(self.response_time),
            geographic_priority: c(self.geographic_priority),
            source_type: c(self.source_type),
        };
        if w.sum() <= 0.0 {
            Self::default()
        } else {
            w
        }
    }

    fn sum(&self) -> f32 {
        self.success_rate + self.response_time + self.geographic_priority + self.source_type
    }
}

/// Per-query inputs that are the same for every source.
#[derive(Clone, Copy, Debug)]
pub struct ScoreContext<'a> {
    pub location: &'a str,
    pub weights: PriorityWeights,
    pub response_time_cap_ms: u64,
}

impl<'a> ScoreContext<'a> {
    pub fn new(location: &'a str, weights: PriorityWeights) -> Self {
        Self {
            location,
            weights,
            response_time_cap_ms: DEFAULT_RESPONSE_TIME_CAP_MS,
        }
    }
}

/// A source annotated for one specific query. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredSource {
    pub source: SourceRecord,
    pub priority_score: f32,
    pub geographic_match: f32,
    pub type_relevance: f32,
}

/// Swappable scoring seam; the weighted heuristic is the default.
pub trait ScoringStrategy: Send + Sync {
    fn score(&self, source: &SourceRecord, query: &Query, ctx: &ScoreContext<'_>) -> ScoredSource;
    fn name(&self) -> &'static str;
}

/// Weighted-sum heuristic.
#[derive(Clone, Copy, Debug, Default)]
pub struct WeightedScorer;

impl ScoringStrategy for WeightedScorer {
    fn score(&self, source: &SourceRecord, query: &Query, ctx: &ScoreContext<'_>) -> ScoredSource {
        let geo = geographic_match(source, query, ctx.location);
        let ty = type_relevance(source.source_type, query.profile());
        let speed = response_time_score(source.avg_response_time_ms, ctx.response_time_cap_ms);

        let w = ctx.weights.sanitized();
        let raw = w.success_rate * clamp01(source.success_rate)
            + w.response_time * speed
            + w.geographic_priority * geo
            + w.source_type * ty;
        let base = raw / w.sum().max(1e-6);

        let score = match source.ml_confidence {
            Some(ml) => base + ML_BONUS * clamp01(ml) * (1.0 - base),
            None => base,
        };

        ScoredSource {
            source: source.clone(),
            priority_score: clamp01(score),
            geographic_match: geo,
            type_relevance: ty,
        }
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}

/// Convenience: weighted score with the default response-time cap.
pub fn score(source: &SourceRecord, query: &Query, location: &str, weights: PriorityWeights) -> f32 {
    WeightedScorer
        .score(source, query, &ScoreContext::new(location, weights))
        .priority_score
}

/// `max(0, 1 - avg / cap)`.
pub fn response_time_score(avg_ms: u64, cap_ms: u64) -> f32 {
    let cap = cap_ms.max(1) as f32;
    (1.0 - avg_ms as f32 / cap).max(0.0)
}

/// Domain rule table: which source types are useful for which kind of query.
pub fn type_relevance(t: SourceType, profile: QueryProfile) -> f32 {
    use SourceType::*;
    match profile {
        QueryProfile::Rare => match t {
            AuctionHouse => 1.0,
            GradingService => 0.9,
            Dealer => 0.7,
            Database => 0.6,
            Association => 0.5,
            Marketplace | Mint => 0.4,
            Forum => 0.3,
        },
        QueryProfile::ErrorVariety => match t {
            Forum => 1.0,
            Database => 0.9,
            Association => 0.8,
            GradingService => 0.7,
            AuctionHouse => 0.5,
            Dealer | Marketplace => 0.4,
            Mint => 0.3,
        },
        QueryProfile::Common => 0.5,
    }
}

/* ----------------------------
Geography
---------------------------- */

const COUNTRY_ALIASES: &[(&str, &str)] = &[
    ("us", "united states"),
    ("usa", "united states"),
    ("u s", "united states"),
    ("u s a", "united states"),
    ("america", "united states"),
    ("united states of america", "united states"),
    ("uk", "united kingdom"),
    ("gb", "united kingdom"),
    ("great britain", "united kingdom"),
    ("britain", "united kingdom"),
    ("england", "united kingdom"),
    ("deutschland", "germany"),
    ("de", "germany"),
    ("holland", "netherlands"),
    ("prc", "china"),
];

const COUNTRY_CONTINENTS: &[(&str, &str)] = &[
    ("united states", "north america"),
    ("canada", "north america"),
    ("mexico", "north america"),
    ("united kingdom", "europe"),
    ("germany", "europe"),
    ("france", "europe"),
    ("italy", "europe"),
    ("spain", "europe"),
    ("netherlands", "europe"),
    ("switzerland", "europe"),
    ("austria", "europe"),
    ("ireland", "europe"),
    ("belgium", "europe"),
    ("poland", "europe"),
    ("czech republic", "europe"),
    ("china", "asia"),
    ("japan", "asia"),
    ("india", "asia"),
    ("singapore", "asia"),
    ("hong kong", "asia"),
    ("australia", "oceania"),
    ("new zealand", "oceania"),
    ("brazil", "south america"),
    ("argentina", "south america"),
    ("south africa", "africa"),
    ("egypt", "africa"),
];

const CONTINENTS: &[&str] = &[
    "north america",
    "south america",
    "europe",
    "asia",
    "africa",
    "oceania",
];

#[derive(Debug, Clone, PartialEq)]
struct Place {
    country: Option<String>,
    continent: Option<&'static str>,
}

fn normalize_place(s: &str) -> String {
    let lowered = s.trim().to_ascii_lowercase().replace(['-', '_', '.'], " ");
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_global(s: &str) -> bool {
    matches!(
        normalize_place(s).as_str(),
        "" | "global" | "worldwide" | "international" | "world"
    )
}

fn continent_of(country: &str) -> Option<&'static str> {
    COUNTRY_CONTINENTS
        .iter()
        .find(|(c, _)| *c == country)
        .map(|(_, cont)| *cont)
}

fn resolve_part(part: &str) -> Option<Place> {
    let p = normalize_place(part);
    if p.is_empty() {
        return None;
    }
    if let Some(cont) = CONTINENTS.iter().find(|c| **c == p) {
        return Some(Place {
            country: None,
            continent: Some(cont),
        });
    }
    let canonical = COUNTRY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == p)
        .map(|(_, c)| c.to_string())
        .unwrap_or(p);
    let continent = continent_of(&canonical);
    Some(Place {
        country: Some(canonical),
        continent,
    })
}

/// "Paris, France" resolves via its most specific recognized part, scanning
/// from the right.
fn resolve_place(raw: &str) -> Option<Place> {
    let parts: Vec<&str> = raw.split(',').collect();
    for part in parts.iter().rev() {
        if let Some(place) = resolve_part(part) {
            if place.continent.is_some() {
                return Some(place);
            }
        }
    }
    parts.iter().rev().find_map(|p| resolve_part(p))
}

/// Match between the caller's location and where the source specializes.
pub fn location_match(source_country: &str, location: &str) -> f32 {
    if is_global(location) || is_global(source_country) {
        return 0.5;
    }
    let (Some(loc), Some(src)) = (resolve_place(location), resolve_place(source_country)) else {
        return 0.5;
    };
    match (&loc.country, &src.country) {
        (Some(a), Some(b)) if a == b => return 1.0,
        _ => {}
    }
    match (loc.country.is_none(), loc.continent, src.continent) {
        // Caller named a whole continent the source sits in.
        (true, Some(a), Some(b)) if a == b => 0.5,
        (false, Some(a), Some(b)) if a == b => 0.4,
        _ => 0.1,
    }
}

/// Location match, lifted when the source specializes in the item's country of origin.
pub fn geographic_match(source: &SourceRecord, query: &Query, location: &str) -> f32 {
    let loc = location_match(&source.country, location);
    let origin = match query.country.as_deref() {
        Some(c) if !is_global(c) && !is_global(&source.country) => {
            let same = resolve_place(c)
                .zip(resolve_place(&source.country))
                .is_some_and(|(a, b)| a.country.is_some() && a.country == b.country);
            if same {
                0.8
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    loc.max(origin)
}

/* ----------------------------
Ranking
---------------------------- */

fn tie_break(a: &ScoredSource, b: &ScoredSource) -> Ordering {
    b.source
        .success_rate
        .total_cmp(&a.source.success_rate)
        .then(a.source.avg_response_time_ms.cmp(&b.source.avg_response_time_ms))
        .then(b.priority_score.total_cmp(&a.priority_score))
        .then(a.source.id.cmp(&b.source.id))
}

/// Order an already-scored list: descending score, near-ties resolved by
/// `tie_break`. Clusters are formed greedily from the head of each run so
/// the result is a deterministic total order.
pub fn order_scored(mut scored: Vec<ScoredSource>) -> Vec<ScoredSource> {
    scored.sort_by(|a, b| {
        b.priority_score
            .total_cmp(&a.priority_score)
            .then(a.source.id.cmp(&b.source.id))
    });

    let mut start = 0;
    while start < scored.len() {
        let head = scored[start].priority_score;
        let mut end = start + 1;
        while end < scored.len() && head - scored[end].priority_score < TIE_EPSILON {
            end += 1;
        }
        scored[start..end].sort_by(tie_break);
        start = end;
    }
    scored
}

/// Score every source for `query` and return them in chain-priority order.
pub fn rank_sources(
    strategy: &dyn ScoringStrategy,
    sources: &[SourceRecord],
    query: &Query,
    ctx: &ScoreContext<'_>,
) -> Vec<ScoredSource> {
    let scored = sources
        .iter()
        .map(|s| strategy.score(s, query, ctx))
        .collect::<Vec<_>>();
    order_scored(scored)
}
