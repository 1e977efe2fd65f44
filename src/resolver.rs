//! # Resolver
//! Single entry point: validate → list active sources → score → build chain →
//! execute → analyze failures → feed outcomes back into the registry.
//!
//! Only `InvalidQuery` and `NoSourcesAvailable` produce `success: false`.
//! Any run that gets as far as executing returns a structured answer, even
//! when every source failed.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::adaptive::apply_outcomes;
use crate::backoff::{JitterSource, ThreadRngJitter};
use crate::chain::{build_chain, ChainLink};
use crate::config::resolver::MAX_ATTEMPTS_CEILING;
use crate::config::ResolverSettings;
use crate::error::{ErrorKind, ResolveError};
use crate::executor::SourceExecutor;
use crate::failure::{analyze_failures, FailurePattern};
use crate::orchestrator::{AttemptResult, Orchestrator};
use crate::query::{validate_query, Query};
use crate::registry::{SourceFilter, SourceRegistry};
use crate::run_log::{RunLog, RunSummary};
use crate::scoring::{rank_sources, PriorityWeights, ScoreContext, ScoringStrategy, WeightedScorer, GLOBAL_LOCATION};

/* ----------------------------
Wire types
---------------------------- */

/// Per-request overrides of the service settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_weights: Option<PriorityWeights>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    #[serde(default)]
    pub query: Option<Query>,
    /// Caller location for geographic matching; empty means "global".
    #[serde(default)]
    pub user_location: String,
    /// Source ids or base URLs to try first.
    #[serde(default)]
    pub primary_sources: Vec<String>,
    #[serde(default)]
    pub config: Option<RequestConfig>,
    /// Outer bound on the whole run.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl ResolveRequest {
    pub fn for_query(query: Query) -> Self {
        Self {
            query: Some(query),
            ..Self::default()
        }
    }

    pub fn location(mut self, loc: impl Into<String>) -> Self {
        self.user_location = loc.into();
        self
    }
}

/// Effective configuration of one run, echoed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigUsed {
    pub max_attempts: usize,
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub success_threshold: usize,
    pub priority_weights: PriorityWeights,
    pub scoring_strategy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResults {
    pub successful_results: Vec<AttemptResult>,
    pub failed_attempts: Vec<AttemptResult>,
    pub total_attempts: usize,
    pub success_rate: f32,
    pub fallback_chain: Vec<ChainLink>,
    pub failure_patterns: FailurePattern,
    pub early_terminated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMetadata {
    pub processing_time_ms: u64,
    pub user_location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_used: Option<ConfigUsed>,
    pub adaptive_learning_updated: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<ResolveResults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub metadata: ResponseMetadata,
}

impl ResolveResponse {
    /// Top-level failure: no results, only the error and metadata.
    pub fn rejected(err: &ResolveError, user_location: &str, processing_time_ms: u64) -> Self {
        Self {
            success: false,
            results: None,
            error: Some(ErrorBody {
                kind: err.kind(),
                message: err.to_string(),
            }),
            metadata: ResponseMetadata {
                processing_time_ms,
                user_location: normalized_location(user_location),
                config_used: None,
                adaptive_learning_updated: false,
                timestamp: Utc::now(),
            },
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/* ----------------------------
Resolver
---------------------------- */

pub struct Resolver {
    registry: Arc<dyn SourceRegistry>,
    executor: Arc<dyn SourceExecutor>,
    scorer: Arc<dyn ScoringStrategy>,
    jitter: Arc<dyn JitterSource>,
    settings: ResolverSettings,
    run_log: Arc<RunLog>,
}

impl Resolver {
    pub fn new(
        registry: Arc<dyn SourceRegistry>,
        executor: Arc<dyn SourceExecutor>,
        settings: ResolverSettings,
    ) -> Self {
        let settings = settings.sanitized();
        let run_log = Arc::new(RunLog::with_capacity(settings.run_log_capacity));
        Self {
            registry,
            executor,
            scorer: Arc::new(WeightedScorer),
            jitter: Arc::new(ThreadRngJitter),
            settings,
            run_log,
        }
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ScoringStrategy>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn registry(&self) -> &Arc<dyn SourceRegistry> {
        &self.registry
    }

    pub fn run_log(&self) -> &Arc<RunLog> {
        &self.run_log
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    /// Always answers; top-level failures become `success: false`.
    pub async fn resolve(&self, req: ResolveRequest) -> ResolveResponse {
        let started = Instant::now();
        match self.try_resolve(&req, started).await {
            Ok(resp) => resp,
            Err(e) => {
                counter!("resolver_rejected_total", "kind" => e.kind().as_str()).increment(1);
                warn!(target: "resolver", kind = e.kind().as_str(), error = %e, "resolution rejected");
                ResolveResponse::rejected(
                    &e,
                    &req.user_location,
                    started.elapsed().as_millis() as u64,
                )
            }
        }
    }

    fn effective_config(&self, req: &ResolveRequest) -> Result<ConfigUsed, ResolveError> {
        let o = req.config.clone().unwrap_or_default();
        if o.max_attempts == Some(0) {
            return Err(ResolveError::InvalidQuery("config.maxAttempts must be > 0".to_string()));
        }
        if o.timeout_ms == Some(0) {
            return Err(ResolveError::InvalidQuery("config.timeoutMs must be > 0".to_string()));
        }
        if req.deadline_ms == Some(0) {
            return Err(ResolveError::InvalidQuery("deadlineMs must be > 0".to_string()));
        }
        Ok(ConfigUsed {
            max_attempts: o
                .max_attempts
                .unwrap_or(self.settings.max_attempts)
                .min(MAX_ATTEMPTS_CEILING),
            timeout_ms: o.timeout_ms.unwrap_or(self.settings.timeout_ms),
            batch_size: self.settings.batch_size,
            success_threshold: self.settings.success_threshold,
            priority_weights: o
                .priority_weights
                .map(PriorityWeights::sanitized)
                .unwrap_or(self.settings.weights),
            scoring_strategy: self.scorer.name(),
            deadline_ms: req.deadline_ms,
        })
    }

    async fn try_resolve(
        &self,
        req: &ResolveRequest,
        started: Instant,
    ) -> Result<ResolveResponse, ResolveError> {
        // Validation happens before the registry is touched.
        let query = validate_query(req.query.as_ref())?;
        let cfg = self.effective_config(req)?;
        let location = normalized_location(&req.user_location);

        let sources = self
            .registry
            .list_active(&SourceFilter::default())
            .await
            .map_err(|e| ResolveError::NoSourcesAvailable(format!("registry unavailable: {e}")))?;

        let ctx = ScoreContext {
            location: &location,
            weights: cfg.priority_weights,
            response_time_cap_ms: self.settings.response_time_cap_ms,
        };
        let ranked = rank_sources(self.scorer.as_ref(), &sources, query, &ctx);
        let chain = build_chain(ranked, cfg.max_attempts, &req.primary_sources)?;

        let mut policy = self.settings.execution_policy();
        policy.attempt_timeout = Duration::from_millis(cfg.timeout_ms);
        policy.deadline = req.deadline_ms.map(Duration::from_millis);

        let orchestrator = Orchestrator::new(Arc::clone(&self.executor), Arc::clone(&self.jitter));
        let report = orchestrator.run(&chain, query, &policy).await;

        let total_attempts = report.attempts.len();
        let failure_patterns = analyze_failures(&report.attempts, total_attempts);
        let update =
            apply_outcomes(self.registry.as_ref(), &report.attempts, &self.settings.adaptive_policy())
                .await;

        let (successful_results, failed_attempts): (Vec<_>, Vec<_>) =
            report.attempts.iter().cloned().partition(|a| a.success);
        let success_rate = if total_attempts == 0 {
            0.0
        } else {
            successful_results.len() as f32 / total_attempts as f32
        };
        let processing_time_ms = started.elapsed().as_millis() as u64;

        counter!("resolver_runs_total").increment(1);
        gauge!("resolver_last_run_ts").set(Utc::now().timestamp() as f64);
        info!(
            target: "resolver",
            chain = chain.len(),
            attempts = total_attempts,
            successes = successful_results.len(),
            early_terminated = report.early_terminated,
            deadline_hit = report.deadline_hit,
            elapsed_ms = processing_time_ms,
            "resolution finished"
        );

        self.run_log.push(RunSummary {
            timestamp: Utc::now(),
            user_location: location.clone(),
            chain_length: chain.len(),
            successes: successful_results.len(),
            failures: failed_attempts.len(),
            early_terminated: report.early_terminated,
            processing_time_ms,
            attempted: report.attempts.iter().map(|a| a.source_id.clone()).collect(),
        });

        Ok(ResolveResponse {
            success: true,
            results: Some(ResolveResults {
                successful_results,
                failed_attempts,
                total_attempts,
                success_rate,
                fallback_chain: chain.links(),
                failure_patterns,
                early_terminated: report.early_terminated,
            }),
            error: None,
            metadata: ResponseMetadata {
                processing_time_ms,
                user_location: location,
                config_used: Some(cfg),
                adaptive_learning_updated: update.updated(),
                timestamp: Utc::now(),
            },
        })
    }
}

fn normalized_location(raw: &str) -> String {
    let t = raw.trim();
    if t.is_empty() {
        GLOBAL_LOCATION.to_string()
    } else {
        t.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::SourceData;
    use crate::registry::InMemorySourceRegistry;
    use crate::source::{SourceRecord, SourceType};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl SourceExecutor for Echo {
        async fn execute(&self, s: &SourceRecord, _q: &Query) -> anyhow::Result<SourceData> {
            Ok(SourceData::new(serde_json::json!({ "from": s.id })))
        }
        fn name(&self) -> &'static str {
            "echo"
        }
    }

    fn resolver() -> Resolver {
        let reg = InMemorySourceRegistry::with_sources([
            SourceRecord::new("a", "https://a.test", "A", SourceType::AuctionHouse),
            SourceRecord::new("b", "https://b.test", "B", SourceType::Forum),
        ]);
        Resolver::new(Arc::new(reg), Arc::new(Echo), ResolverSettings::default())
    }

    #[tokio::test]
    async fn overrides_are_validated_and_echoed() {
        let r = resolver();
        let mut req = ResolveRequest::for_query(Query::named("dime"));
        req.config = Some(RequestConfig {
            max_attempts: Some(0),
            ..RequestConfig::default()
        });
        let resp = r.resolve(req.clone()).await;
        assert_eq!(resp.error_kind(), Some(ErrorKind::InvalidQuery));

        req.config = Some(RequestConfig {
            max_attempts: Some(1),
            timeout_ms: Some(1_000),
            priority_weights: None,
        });
        let resp = r.resolve(req).await;
        assert!(resp.success);
        let used = resp.metadata.config_used.unwrap();
        assert_eq!(used.max_attempts, 1);
        assert_eq!(used.timeout_ms, 1_000);
        assert_eq!(resp.results.unwrap().total_attempts, 1);
        assert_eq!(resp.metadata.user_location, "global");
    }

    #[test]
    fn request_parses_camel_case() {
        let req: ResolveRequest = serde_json::from_str(
            r#"{"query":{"name":"x"},"userLocation":"Berlin, Germany","primarySources":["a"],
                "config":{"maxAttempts":4,"timeoutMs":900,"priorityWeights":{"success_rate":1.0}}}"#,
        )
        .unwrap();
        assert_eq!(req.user_location, "Berlin, Germany");
        let cfg = req.config.unwrap();
        assert_eq!(cfg.max_attempts, Some(4));
        let w = cfg.priority_weights.unwrap();
        assert_eq!(w.success_rate, 1.0);
        assert_eq!(w.source_type, 0.1);
    }
}
