//! # Source records
//!
//! A `SourceRecord` is one known external provider together with the live
//! metrics the ranking loop learns over time.
//!
//! - `success_rate` and `ml_confidence` always stay within `[0.0, 1.0]`.
//! - Scoring reads only the typed fields; `SourceMetadata::extra` is an
//!   open-ended bag that nothing in the core interprets.
//! - Records can be seeded from a JSON file (array of records).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fmt, fs, path::Path};

/// Classification of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    AuctionHouse,
    Marketplace,
    Forum,
    Database,
    GradingService,
    Dealer,
    Mint,
    Association,
}

impl SourceType {
    pub const ALL: [SourceType; 8] = [
        SourceType::AuctionHouse,
        SourceType::Marketplace,
        SourceType::Forum,
        SourceType::Database,
        SourceType::GradingService,
        SourceType::Dealer,
        SourceType::Mint,
        SourceType::Association,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::AuctionHouse => "auction_house",
            SourceType::Marketplace => "marketplace",
            SourceType::Forum => "forum",
            SourceType::Database => "database",
            SourceType::GradingService => "grading_service",
            SourceType::Dealer => "dealer",
            SourceType::Mint => "mint",
            SourceType::Association => "association",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-specific configuration with a closed set of recognized keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    /// Path appended to `base_url` by the HTTP executor (e.g. "/api/search").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_path: Option<String>,
    /// Name of the env var holding an API key, if the source needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Pages that only render client-side; the JSON executor cannot use them.
    #[serde(default)]
    pub requires_js: bool,
    /// Forward-compatible bag, never read by scoring.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A known external provider and its learned metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub base_url: String,
    pub name: String,
    pub source_type: SourceType,
    /// Country or region the source specializes in ("global" for none).
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_success_rate")]
    pub success_rate: f32,
    #[serde(default = "default_response_time")]
    pub avg_response_time_ms: u64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    /// Auxiliary learned-affinity signal; absent for fresh sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ml_confidence: Option<f32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub metadata: SourceMetadata,
}

fn default_country() -> String {
    "global".to_string()
}
fn default_language() -> String {
    "en".to_string()
}
fn default_success_rate() -> f32 {
    0.5
}
fn default_response_time() -> u64 {
    3_000
}
fn default_rate_limit() -> u32 {
    60
}
fn default_active() -> bool {
    true
}

impl SourceRecord {
    /// Minimal active record with neutral metrics.
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        name: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            name: name.into(),
            source_type,
            country: default_country(),
            language: default_language(),
            success_rate: default_success_rate(),
            avg_response_time_ms: default_response_time(),
            rate_limit_per_minute: default_rate_limit(),
            ml_confidence: None,
            is_active: true,
            metadata: SourceMetadata::default(),
        }
    }

    pub fn country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    pub fn success_rate(mut self, rate: f32) -> Self {
        self.success_rate = clamp01(rate);
        self
    }

    pub fn response_time(mut self, ms: u64) -> Self {
        self.avg_response_time_ms = ms;
        self
    }

    pub fn ml_confidence(mut self, c: f32) -> Self {
        self.ml_confidence = Some(clamp01(c));
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Re-establish the `[0,1]` invariants after deserialization.
    pub fn sanitized(mut self) -> Self {
        self.success_rate = clamp01(self.success_rate);
        self.ml_confidence = self.ml_confidence.map(clamp01);
        self
    }
}

/// Load records from a JSON array file.
pub fn load_sources_from_file<P: AsRef<Path>>(path: P) -> Result<Vec<SourceRecord>> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let records: Vec<SourceRecord> =
        serde_json::from_str(&content).context("parsing sources json")?;
    Ok(records.into_iter().map(SourceRecord::sanitized).collect())
}

/// Clamp to [0.0, 1.0]; NaN collapses to 0.0.
pub fn clamp01(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults_and_extra_metadata() {
        let raw = r#"{
            "id": "heritage",
            "base_url": "https://coins.ha.com",
            "name": "Heritage",
            "source_type": "auction_house",
            "success_rate": 1.7,
            "metadata": { "search_path": "/api/search", "listing_css": ".lot" }
        }"#;
        let rec: SourceRecord = serde_json::from_str::<SourceRecord>(raw).unwrap().sanitized();
        assert_eq!(rec.source_type, SourceType::AuctionHouse);
        assert_eq!(rec.country, "global");
        assert!(rec.is_active);
        assert_eq!(rec.success_rate, 1.0);
        assert_eq!(rec.metadata.search_path.as_deref(), Some("/api/search"));
        assert!(rec.metadata.extra.contains_key("listing_css"));
    }

    #[test]
    fn clamp01_handles_nan_and_bounds() {
        assert_eq!(clamp01(f32::NAN), 0.0);
        assert_eq!(clamp01(-3.0), 0.0);
        assert_eq!(clamp01(4.0), 1.0);
        assert!((clamp01(0.25) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn type_names_match_serde() {
        for t in SourceType::ALL {
            let v = serde_json::to_value(t).unwrap();
            assert_eq!(v, serde_json::json!(t.as_str()));
        }
    }
}
