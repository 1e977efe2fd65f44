//! # Source Registry
//!
//! The only state shared between concurrent resolutions. Everything else
//! reads a snapshot through `list_active` and writes through
//! `apply_adjustment`, which must be an atomic read-modify-write.
//!
//! `InMemorySourceRegistry` serializes writes behind one `RwLock`, so
//! concurrent adjustments to the same record can never lose an update.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::error::RegistryError;
use crate::source::{clamp01, load_sources_from_file, SourceRecord, SourceType};

/// Largest `success_rate` move a single adjustment may cause.
pub const MAX_ADJUSTMENT_STEP: f32 = 0.05;

/// Smoothing factor for the observed response-time average.
pub const RESPONSE_TIME_ALPHA: f64 = 0.1;

/// Optional narrowing of `list_active`. Empty vectors mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceFilter {
    pub source_types: Vec<SourceType>,
    pub countries: Vec<String>,
}

impl SourceFilter {
    pub fn matches(&self, rec: &SourceRecord) -> bool {
        let type_ok = self.source_types.is_empty() || self.source_types.contains(&rec.source_type);
        let country_ok = self.countries.is_empty()
            || self
                .countries
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&rec.country));
        type_ok && country_ok
    }
}

/// One bounded metric update derived from an attempt outcome.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Adjustment {
    pub success_rate_delta: f32,
    /// Latency of a successful attempt, folded into the moving average.
    pub observed_response_ms: Option<u64>,
}

impl Adjustment {
    pub fn delta(success_rate_delta: f32) -> Self {
        Self {
            success_rate_delta,
            observed_response_ms: None,
        }
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.observed_response_ms = Some(ms);
        self
    }

    /// Apply to a record in place, enforcing the per-step and `[0,1]` bounds.
    pub fn apply_to(&self, rec: &mut SourceRecord) {
        let step = if self.success_rate_delta.is_finite() {
            self.success_rate_delta
                .clamp(-MAX_ADJUSTMENT_STEP, MAX_ADJUSTMENT_STEP)
        } else {
            0.0
        };
        rec.success_rate = clamp01(rec.success_rate + step);

        if let Some(ms) = self.observed_response_ms {
            let old = rec.avg_response_time_ms as f64;
            let blended = old + RESPONSE_TIME_ALPHA * (ms as f64 - old);
            rec.avg_response_time_ms = blended.round().max(0.0) as u64;
        }
    }
}

/// Repository interface over the source store.
#[async_trait]
pub trait SourceRegistry: Send + Sync {
    /// All records with `is_active`, narrowed by `filter`.
    async fn list_active(&self, filter: &SourceFilter) -> Result<Vec<SourceRecord>, RegistryError>;

    /// Atomically apply `adjustment` to one record and return the new state.
    async fn apply_adjustment(
        &self,
        source_id: &str,
        adjustment: Adjustment,
    ) -> Result<SourceRecord, RegistryError>;
}

/// Process-local registry backed by a locked map.
#[derive(Debug, Default)]
pub struct InMemorySourceRegistry {
    inner: RwLock<HashMap<String, SourceRecord>>,
}

impl InMemorySourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sources(records: impl IntoIterator<Item = SourceRecord>) -> Self {
        let map = records
            .into_iter()
            .map(|r| (r.id.clone(), r.sanitized()))
            .collect();
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Seed from a JSON array file. Missing or unreadable files yield an
    /// empty registry (logged).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match load_sources_from_file(path) {
            Ok(records) => {
                tracing::info!(target: "registry", count = records.len(), path = %path.display(), "sources loaded");
                Self::with_sources(records)
            }
            Err(e) => {
                tracing::warn!(target: "registry", error = %format!("{e:#}"), "no sources loaded");
                Self::default()
            }
        }
    }

    /// Insert or replace a record. This is how discovery feeds new sources in.
    pub fn upsert(&self, record: SourceRecord) -> Result<(), RegistryError> {
        let mut map = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        map.insert(record.id.clone(), record.sanitized());
        Ok(())
    }

    pub fn set_active(&self, source_id: &str, active: bool) -> Result<(), RegistryError> {
        let mut map = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        let rec = map
            .get_mut(source_id)
            .ok_or_else(|| RegistryError::NotFound(source_id.to_string()))?;
        rec.is_active = active;
        Ok(())
    }

    pub fn get(&self, source_id: &str) -> Option<SourceRecord> {
        self.inner.read().ok()?.get(source_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SourceRegistry for InMemorySourceRegistry {
    async fn list_active(&self, filter: &SourceFilter) -> Result<Vec<SourceRecord>, RegistryError> {
        let map = self.inner.read().map_err(|_| RegistryError::Poisoned)?;
        let mut out: Vec<SourceRecord> = map
            .values()
            .filter(|r| r.is_active && filter.matches(r))
            .cloned()
            .collect();
        // HashMap order is random; keep listings stable.
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    async fn apply_adjustment(
        &self,
        source_id: &str,
        adjustment: Adjustment,
    ) -> Result<SourceRecord, RegistryError> {
        let mut map = self.inner.write().map_err(|_| RegistryError::Poisoned)?;
        let rec = map
            .get_mut(source_id)
            .ok_or_else(|| RegistryError::NotFound(source_id.to_string()))?;
        adjustment.apply_to(rec);
        Ok(rec.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn rec(id: &str, t: SourceType) -> SourceRecord {
        SourceRecord::new(id, format!("https://{id}.test"), id, t)
    }

    #[tokio::test]
    async fn list_active_skips_inactive_and_applies_filter() {
        let reg = InMemorySourceRegistry::with_sources([
            rec("a", SourceType::Forum).country("USA"),
            rec("b", SourceType::Dealer).country("UK"),
            rec("c", SourceType::Forum).inactive(),
        ]);
        let all = reg.list_active(&SourceFilter::default()).await.unwrap();
        assert_eq!(
            all.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );

        let f = SourceFilter {
            source_types: vec![SourceType::Forum],
            countries: vec!["usa".into()],
        };
        let only = reg.list_active(&f).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].id, "a");
    }

    #[tokio::test]
    async fn adversarial_deltas_stay_within_bounds() {
        let reg = InMemorySourceRegistry::with_sources([rec("a", SourceType::Forum)]);
        for d in [10.0, 1e9, f32::INFINITY, -50.0, f32::NAN, 0.7, -0.7, 3.0] {
            let r = reg.apply_adjustment("a", Adjustment::delta(d)).await.unwrap();
            assert!((0.0..=1.0).contains(&r.success_rate), "out of range after {d}");
        }
    }

    #[tokio::test]
    async fn single_step_is_bounded() {
        let reg = InMemorySourceRegistry::with_sources([rec("a", SourceType::Forum)]);
        let r = reg.apply_adjustment("a", Adjustment::delta(0.9)).await.unwrap();
        assert!((r.success_rate - (0.5 + MAX_ADJUSTMENT_STEP)).abs() < 1e-6);
    }

    #[tokio::test]
    async fn response_time_is_smoothed() {
        let reg = InMemorySourceRegistry::with_sources([rec("a", SourceType::Forum).response_time(1_000)]);
        let r = reg
            .apply_adjustment("a", Adjustment::delta(0.0).with_response_time(2_000))
            .await
            .unwrap();
        assert_eq!(r.avg_response_time_ms, 1_100);
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let reg = InMemorySourceRegistry::new();
        let err = reg.apply_adjustment("nope", Adjustment::delta(0.01)).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_do_not_lose_updates() {
        let reg = Arc::new(InMemorySourceRegistry::with_sources([
            rec("a", SourceType::Forum).success_rate(0.2)
        ]));
        let mut handles = Vec::new();
        for _ in 0..200 {
            let reg = Arc::clone(&reg);
            handles.push(tokio::spawn(async move {
                reg.apply_adjustment("a", Adjustment::delta(0.001)).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let final_rate = reg.get("a").unwrap().success_rate;
        assert!((final_rate - 0.4).abs() < 1e-3, "lost updates: {final_rate}");
    }

    #[tokio::test]
    async fn upsert_makes_new_source_visible() {
        let reg = InMemorySourceRegistry::new();
        reg.upsert(rec("fresh", SourceType::Mint)).unwrap();
        let all = reg.list_active(&SourceFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
        reg.set_active("fresh", false).unwrap();
        assert!(reg.list_active(&SourceFilter::default()).await.unwrap().is_empty());
    }
}
