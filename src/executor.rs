// src/executor.rs
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::query::{Query, Rarity};
use crate::source::{clamp01, SourceRecord};

/// Data returned by one source for one query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceData {
    pub payload: serde_json::Value,
    /// Source-reported match confidence in [0,1], if it gives one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl SourceData {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, c: f32) -> Self {
        self.confidence = Some(clamp01(c));
        self
    }
}

/// Per-source query collaborator. How a source is actually queried
/// (scraping, API auth, pacing) lives behind this trait.
#[async_trait]
pub trait SourceExecutor: Send + Sync {
    async fn execute(&self, source: &SourceRecord, query: &Query) -> Result<SourceData>;
    fn name(&self) -> &'static str;
}

/// Default executor: `GET {base_url}{search_path}` with the query hints as
/// URL parameters, expecting a JSON body.
pub struct HttpJsonExecutor {
    client: reqwest::Client,
}

impl HttpJsonExecutor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("source-resolver/0.1")
            .connect_timeout(Duration::from_secs(4))
            .build()
            .context("building http client")?;
        Ok(Self { client })
    }

    fn params(query: &Query) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        if let Some(n) = &query.name {
            out.push(("q", n.clone()));
        }
        if let Some(c) = &query.category {
            out.push(("category", c.clone()));
        }
        if let Some(c) = &query.country {
            out.push(("country", c.clone()));
        }
        if let Some(r) = query.rarity.filter(|r| *r != Rarity::Unknown) {
            if let Some(s) = serde_json::to_value(r).ok().and_then(|v| v.as_str().map(String::from)) {
                out.push(("rarity", s));
            }
        }
        if let Some(y) = query.year {
            out.push(("year", y.to_string()));
        }
        out
    }
}

#[async_trait]
impl SourceExecutor for HttpJsonExecutor {
    async fn execute(&self, source: &SourceRecord, query: &Query) -> Result<SourceData> {
        if source.metadata.requires_js {
            bail!("source '{}' requires client-side rendering", source.id);
        }
        let url = format!(
            "{}{}",
            source.base_url.trim_end_matches('/'),
            source.metadata.search_path.as_deref().unwrap_or("")
        );

        let mut req = self.client.get(&url).query(&Self::params(query));
        if let Some(var) = &source.metadata.api_key_env {
            if let Ok(key) = std::env::var(var) {
                req = req.bearer_auth(key);
            }
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("network error fetching {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            bail!("http status {} from {}", status.as_u16(), source.id);
        }
        let payload: serde_json::Value = resp.json().await.context("parse json body")?;
        let confidence = payload
            .get("confidence")
            .and_then(serde_json::Value::as_f64)
            .map(|c| clamp01(c as f32));

        Ok(SourceData {
            payload,
            confidence,
        })
    }

    fn name(&self) -> &'static str {
        "http-json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceType;

    #[test]
    fn params_carry_hints() {
        let q = Query::named("Morgan dollar")
            .with_country("USA")
            .with_rarity(Rarity::UltraRare);
        let p = HttpJsonExecutor::params(&q);
        assert!(p.contains(&("q", "Morgan dollar".to_string())));
        assert!(p.contains(&("rarity", "ultra_rare".to_string())));
        assert!(p.contains(&("country", "USA".to_string())));

        let q = Query::named("dime").with_rarity(Rarity::Unknown);
        assert!(HttpJsonExecutor::params(&q).iter().all(|(k, _)| *k != "rarity"));
    }

    #[tokio::test]
    async fn js_only_sources_are_rejected_without_io() {
        let exec = HttpJsonExecutor::new().unwrap();
        let mut s = SourceRecord::new("spa", "https://spa.invalid", "Spa", SourceType::Marketplace);
        s.metadata.requires_js = true;
        let err = exec.execute(&s, &Query::named("x")).await.unwrap_err();
        assert!(err.to_string().contains("client-side"));
    }
}
