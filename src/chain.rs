//! # Chain Builder
//!
//! Turns a ranked source list into a bounded, diversified fallback chain:
//!
//! 1. Seed hints (`primarySources`) go first, in the caller's order.
//! 2. Remaining sources are grouped by `source_type` (groups ordered by their
//!    best member) and taken round-robin, one per group per cycle.
//! 3. After `3 × groups` cycles without filling the chain, diversification
//!    stops and the rest is filled strictly by descending score.
//!
//! A source never appears twice; `attempt_order` runs 1..=N.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};

use crate::error::ResolveError;
use crate::scoring::ScoredSource;
use crate::source::SourceType;

/// Round-robin cycles allowed per type group before falling back to score order.
pub const DIVERSIFY_CYCLES_PER_GROUP: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainEntry {
    #[serde(flatten)]
    pub scored: ScoredSource,
    pub attempt_order: usize,
}

impl ChainEntry {
    pub fn source_id(&self) -> &str {
        &self.scored.source.id
    }

    pub fn source_type(&self) -> SourceType {
        self.scored.source.source_type
    }
}

/// Compact view returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainLink {
    pub url: String,
    pub priority_score: f32,
    pub attempt_order: usize,
}

/// Ordered sources attempted for one query. Built once, consumed once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FallbackChain {
    entries: Vec<ChainEntry>,
}

impl FallbackChain {
    pub fn entries(&self) -> &[ChainEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn links(&self) -> Vec<ChainLink> {
        self.entries
            .iter()
            .map(|e| ChainLink {
                url: e.scored.source.base_url.clone(),
                priority_score: e.scored.priority_score,
                attempt_order: e.attempt_order,
            })
            .collect()
    }

    pub fn into_entries(self) -> Vec<ChainEntry> {
        self.entries
    }
}

fn matches_seed(s: &ScoredSource, seed: &str) -> bool {
    let seed = seed.trim();
    !seed.is_empty()
        && (s.source.id == seed
            || s.source.base_url.trim_end_matches('/') == seed.trim_end_matches('/'))
}

/// Build the chain from sources already in ranked order.
pub fn build_chain(
    ranked: Vec<ScoredSource>,
    max_attempts: usize,
    seeds: &[String],
) -> Result<FallbackChain, ResolveError> {
    if ranked.is_empty() {
        return Err(ResolveError::NoSourcesAvailable(
            "registry returned no active sources".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut remaining: Vec<ScoredSource> = ranked
        .into_iter()
        .filter(|s| seen.insert(s.source.id.clone()))
        .collect();

    let mut selected: Vec<ScoredSource> = Vec::with_capacity(max_attempts.min(remaining.len()));

    // 1) Seeds.
    for seed in seeds {
        if selected.len() >= max_attempts {
            break;
        }
        if let Some(pos) = remaining.iter().position(|s| matches_seed(s, seed)) {
            selected.push(remaining.remove(pos));
        }
    }

    // 2) Round-robin over type groups.
    let mut groups: Vec<(SourceType, VecDeque<ScoredSource>)> = Vec::new();
    for s in remaining {
        let t = s.source.source_type;
        match groups.iter_mut().find(|(gt, _)| *gt == t) {
            Some((_, q)) => q.push_back(s),
            None => groups.push((t, VecDeque::from([s]))),
        }
    }

    let cutoff = DIVERSIFY_CYCLES_PER_GROUP * groups.len();
    let mut cycles = 0;
    while selected.len() < max_attempts
        && cycles < cutoff
        && groups.iter().any(|(_, q)| !q.is_empty())
    {
        for (_, q) in groups.iter_mut() {
            if selected.len() >= max_attempts {
                break;
            }
            if let Some(s) = q.pop_front() {
                selected.push(s);
            }
        }
        cycles += 1;
    }

    // 3) Safety cutoff: fill strictly by score.
    if selected.len() < max_attempts {
        let mut rest: Vec<ScoredSource> = groups.into_iter().flat_map(|(_, q)| q).collect();
        rest.sort_by(|a, b| {
            b.priority_score
                .total_cmp(&a.priority_score)
                .then(a.source.id.cmp(&b.source.id))
        });
        let room = max_attempts - selected.len();
        selected.extend(rest.into_iter().take(room));
    }

    // 4) Attempt order.
    let entries = selected
        .into_iter()
        .enumerate()
        .map(|(i, scored)| ChainEntry {
            scored,
            attempt_order: i + 1,
        })
        .collect();

    Ok(FallbackChain { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceRecord;

    fn scored(id: &str, t: SourceType, p: f32) -> ScoredSource {
        ScoredSource {
            source: SourceRecord::new(id, format!("https://{id}.test/"), id, t),
            priority_score: p,
            geographic_match: 0.5,
            type_relevance: 0.5,
        }
    }

    /// Ranked list with types A=auction (4), B=forum (4), C=dealer (2).
    fn mixed() -> Vec<ScoredSource> {
        vec![
            scored("a1", SourceType::AuctionHouse, 0.95),
            scored("a2", SourceType::AuctionHouse, 0.90),
            scored("b1", SourceType::Forum, 0.85),
            scored("a3", SourceType::AuctionHouse, 0.80),
            scored("b2", SourceType::Forum, 0.75),
            scored("c1", SourceType::Dealer, 0.70),
            scored("a4", SourceType::AuctionHouse, 0.65),
            scored("b3", SourceType::Forum, 0.60),
            scored("c2", SourceType::Dealer, 0.55),
            scored("b4", SourceType::Forum, 0.50),
        ]
    }

    fn ids(c: &FallbackChain) -> Vec<&str> {
        c.entries().iter().map(|e| e.source_id()).collect()
    }

    #[test]
    fn empty_registry_fails() {
        let err = build_chain(Vec::new(), 5, &[]).unwrap_err();
        assert!(matches!(err, ResolveError::NoSourcesAvailable(_)));
    }

    #[test]
    fn diversifies_round_robin() {
        let chain = build_chain(mixed(), 6, &[]).unwrap();
        assert_eq!(ids(&chain), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
        let orders: Vec<usize> = chain.entries().iter().map(|e| e.attempt_order).collect();
        assert_eq!(orders, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn exhausted_type_drops_out_of_rotation() {
        let chain = build_chain(mixed(), 10, &[]).unwrap();
        assert_eq!(
            ids(&chain),
            vec!["a1", "b1", "c1", "a2", "b2", "c2", "a3", "b3", "a4", "b4"]
        );
    }

    #[test]
    fn length_is_min_of_limit_and_sources_without_duplicates() {
        for n in 0..14 {
            let mut input = mixed();
            input.push(scored("a1", SourceType::AuctionHouse, 0.1));
            let chain = build_chain(input, n, &[]).unwrap();
            assert_eq!(chain.len(), n.min(10));
            let uniq: HashSet<_> = ids(&chain).into_iter().collect();
            assert_eq!(uniq.len(), chain.len());
        }
    }

    #[test]
    fn safety_cutoff_fills_by_score() {
        let mut input: Vec<ScoredSource> = (0..8)
            .map(|i| scored(&format!("m{i}"), SourceType::Mint, 0.9 - i as f32 * 0.05))
            .collect();
        input.push(scored("f1", SourceType::Forum, 0.2));
        let chain = build_chain(input, 9, &[]).unwrap();
        // 2 groups → 6 cycles: m0,f1, then m1..m5; the rest by score.
        assert_eq!(
            ids(&chain),
            vec!["m0", "f1", "m1", "m2", "m3", "m4", "m5", "m6", "m7"]
        );
    }

    #[test]
    fn seeds_go_first_by_id_or_url() {
        let seeds = vec![
            "https://c2.test".to_string(),
            "unknown".to_string(),
            "b4".to_string(),
        ];
        let chain = build_chain(mixed(), 4, &seeds).unwrap();
        assert_eq!(ids(&chain), vec!["c2", "b4", "a1", "b1"]);
    }

    #[test]
    fn links_carry_url_and_order() {
        let chain = build_chain(mixed(), 2, &[]).unwrap();
        let links = chain.links();
        assert_eq!(links[0].url, "https://a1.test/");
        assert_eq!(links[1].attempt_order, 2);
    }
}
