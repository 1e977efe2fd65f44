//! # Execution Orchestrator
//!
//! Walks a fallback chain in fixed-size batches:
//!
//! - every entry of a batch is dispatched concurrently and raced against its
//!   own timeout;
//! - the next batch starts only after the current one fully settles;
//! - once cumulative successes reach `success_threshold`, no further batch
//!   is dispatched;
//! - between batches a `BackoffPolicy` delay is applied;
//! - an optional outer deadline shortens attempt timeouts and stops
//!   dispatching, returning what was gathered.
//!
//! Attempt failures (errors, panics, timeouts) become failed
//! `AttemptResult`s. The registry is never touched here.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backoff::{BackoffPolicy, JitterSource};
use crate::chain::{ChainEntry, FallbackChain};
use crate::error::ErrorKind;
use crate::executor::{SourceData, SourceExecutor};
use crate::query::Query;
use crate::source::SourceType;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Outcome of one chain entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptResult {
    pub source_id: String,
    pub source_type: SourceType,
    pub region: String,
    pub attempt_order: usize,
    pub success: bool,
    pub response_time_ms: u64,
    pub error: Option<AttemptError>,
    pub data: Option<SourceData>,
    pub timestamp: DateTime<Utc>,
    /// Stopped by the caller's outer deadline before its own timeout ran out.
    /// Says nothing about the source, so it is never fed back into rankings.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deadline_cut: bool,
}

impl AttemptResult {
    pub fn is_timeout(&self) -> bool {
        matches!(&self.error, Some(e) if e.kind == ErrorKind::AttemptTimeout)
    }

    fn base(entry: &ChainEntry, elapsed_ms: u64) -> Self {
        Self {
            source_id: entry.scored.source.id.clone(),
            source_type: entry.scored.source.source_type,
            region: entry.scored.source.country.clone(),
            attempt_order: entry.attempt_order,
            success: false,
            response_time_ms: elapsed_ms,
            error: None,
            data: None,
            timestamp: Utc::now(),
            deadline_cut: false,
        }
    }

    fn succeeded(entry: &ChainEntry, elapsed_ms: u64, data: SourceData) -> Self {
        Self {
            success: true,
            data: Some(data),
            ..Self::base(entry, elapsed_ms)
        }
    }

    fn failed(entry: &ChainEntry, elapsed_ms: u64, kind: ErrorKind, message: String) -> Self {
        Self {
            error: Some(AttemptError { kind, message }),
            ..Self::base(entry, elapsed_ms)
        }
    }
}

/// Knobs for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionPolicy {
    pub batch_size: usize,
    pub attempt_timeout: Duration,
    pub success_threshold: usize,
    pub backoff: BackoffPolicy,
    /// Outer bound on the whole run, measured from `run` start.
    pub deadline: Option<Duration>,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            batch_size: 3,
            attempt_timeout: Duration::from_millis(8_000),
            success_threshold: 5,
            backoff: BackoffPolicy::default(),
            deadline: None,
        }
    }
}

/// Everything a run produced, in attempt order.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub attempts: Vec<AttemptResult>,
    pub batches_run: usize,
    /// Stopped on the success threshold while chain entries remained.
    pub early_terminated: bool,
    /// Stopped because the outer deadline expired.
    pub deadline_hit: bool,
}

impl ExecutionReport {
    pub fn successes(&self) -> usize {
        self.attempts.iter().filter(|a| a.success).count()
    }
}

pub struct Orchestrator {
    executor: Arc<dyn SourceExecutor>,
    jitter: Arc<dyn JitterSource>,
}

impl Orchestrator {
    pub fn new(executor: Arc<dyn SourceExecutor>, jitter: Arc<dyn JitterSource>) -> Self {
        Self { executor, jitter }
    }

    pub async fn run(
        &self,
        chain: &FallbackChain,
        query: &Query,
        policy: &ExecutionPolicy,
    ) -> ExecutionReport {
        let started = Instant::now();
        let deadline = policy.deadline.map(|d| started + d);
        let query = Arc::new(query.clone());
        let batches: Vec<&[ChainEntry]> = chain.entries().chunks(policy.batch_size.max(1)).collect();

        let mut report = ExecutionReport {
            attempts: Vec::with_capacity(chain.len()),
            ..ExecutionReport::default()
        };
        let mut successes = 0usize;

        for (i, batch) in batches.iter().enumerate() {
            let mut timeout = policy.attempt_timeout;
            let mut deadline_bound = false;
            if let Some(dl) = deadline {
                let left = dl.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    report.deadline_hit = true;
                    info!(target: "orchestrator", batch = i, "outer deadline reached; returning partial results");
                    break;
                }
                if left < timeout {
                    timeout = left;
                    deadline_bound = true;
                }
            }

            let results = join_all(
                batch
                    .iter()
                    .map(|entry| self.attempt(entry, Arc::clone(&query), timeout, deadline_bound)),
            )
            .await;

            successes += results.iter().filter(|r| r.success).count();
            report.attempts.extend(results);
            report.batches_run += 1;

            let has_more = i + 1 < batches.len();
            if successes >= policy.success_threshold {
                report.early_terminated = has_more;
                if has_more {
                    counter!("resolver_early_terminations_total").increment(1);
                    debug!(target: "orchestrator", successes, batches_run = report.batches_run, "success threshold reached");
                }
                break;
            }
            if !has_more {
                break;
            }

            let mut delay = policy.backoff.delay(self.jitter.as_ref());
            if let Some(dl) = deadline {
                delay = delay.min(dl.saturating_duration_since(Instant::now()));
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        report
    }

    async fn attempt(
        &self,
        entry: &ChainEntry,
        query: Arc<Query>,
        timeout: Duration,
        deadline_bound: bool,
    ) -> AttemptResult {
        let executor = Arc::clone(&self.executor);
        let source = entry.scored.source.clone();
        let started = Instant::now();

        let mut handle = tokio::spawn(async move { executor.execute(&source, &query).await });
        let outcome = tokio::time::timeout(timeout, &mut handle).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("resolver_attempt_ms").record(elapsed_ms as f64);

        let result = match outcome {
            Ok(Ok(Ok(data))) => AttemptResult::succeeded(entry, elapsed_ms, data),
            Ok(Ok(Err(e))) => {
                AttemptResult::failed(entry, elapsed_ms, ErrorKind::AttemptError, format!("{e:#}"))
            }
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    "executor panicked".to_string()
                } else {
                    "executor task cancelled".to_string()
                };
                AttemptResult::failed(entry, elapsed_ms, ErrorKind::AttemptError, message)
            }
            Err(_) => {
                // Best effort; the underlying I/O may still be in flight.
                handle.abort();
                let message = if deadline_bound {
                    format!("cut by outer deadline after {}ms", timeout.as_millis())
                } else {
                    format!("timed out after {}ms", timeout.as_millis())
                };
                AttemptResult {
                    deadline_cut: deadline_bound,
                    ..AttemptResult::failed(entry, elapsed_ms, ErrorKind::AttemptTimeout, message)
                }
            }
        };

        let outcome_label = match &result.error {
            None => "success",
            Some(e) if e.kind == ErrorKind::AttemptTimeout => "timeout",
            Some(_) => "error",
        };
        counter!("resolver_attempts_total", "outcome" => outcome_label).increment(1);

        match &result.error {
            None => debug!(target: "orchestrator", source_id = %result.source_id, attempt_order = result.attempt_order, elapsed_ms, "attempt succeeded"),
            Some(e) if e.kind == ErrorKind::AttemptTimeout => info!(target: "orchestrator", source_id = %result.source_id, attempt_order = result.attempt_order, elapsed_ms, "attempt timed out"),
            Some(e) => debug!(target: "orchestrator", source_id = %result.source_id, attempt_order = result.attempt_order, error = %e.message, "attempt failed"),
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::FixedJitter;
    use crate::chain::build_chain;
    use crate::scoring::ScoredSource;
    use crate::source::SourceRecord;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Sleep(Duration),
        Panic,
    }

    struct Scripted {
        behavior: fn(&SourceRecord) -> Behavior,
        calls: AtomicUsize,
        log: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(behavior: fn(&SourceRecord) -> Behavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                calls: AtomicUsize::new(0),
                log: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SourceExecutor for Scripted {
        async fn execute(&self, source: &SourceRecord, _q: &Query) -> anyhow::Result<SourceData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("start:{}", source.id));
            let b = (self.behavior)(source);
            let out = match b {
                Behavior::Succeed => Ok(SourceData::new(serde_json::json!({"id": source.id}))),
                Behavior::Fail => Err(anyhow::anyhow!("http status 503")),
                Behavior::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    Ok(SourceData::new(serde_json::json!({})))
                }
                Behavior::Panic => panic!("scripted panic"),
            };
            self.log.lock().unwrap().push(format!("end:{}", source.id));
            out
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn chain_of(n: usize) -> FallbackChain {
        let ranked = (0..n)
            .map(|i| ScoredSource {
                source: SourceRecord::new(
                    format!("s{i}"),
                    format!("https://s{i}.test"),
                    format!("S{i}"),
                    SourceType::Database,
                ),
                priority_score: 1.0 - i as f32 * 0.01,
                geographic_match: 0.5,
                type_relevance: 0.5,
            })
            .collect();
        build_chain(ranked, n, &[]).unwrap()
    }

    fn quick_policy() -> ExecutionPolicy {
        ExecutionPolicy {
            backoff: BackoffPolicy::none(),
            ..ExecutionPolicy::default()
        }
    }

    fn orch(exec: Arc<Scripted>) -> Orchestrator {
        Orchestrator::new(exec, Arc::new(FixedJitter(0)))
    }

    #[tokio::test]
    async fn stops_after_threshold_but_finishes_dispatched_batch() {
        let exec = Scripted::new(|_| Behavior::Succeed);
        let report = orch(exec.clone())
            .run(&chain_of(9), &Query::named("x"), &quick_policy())
            .await;
        // 3 < 5 after batch 1, so batch 2 runs; 6 >= 5, so batch 3 never does.
        assert_eq!(exec.calls.load(Ordering::SeqCst), 6);
        assert_eq!(report.batches_run, 2);
        assert_eq!(report.successes(), 6);
        assert!(report.early_terminated);
    }

    #[tokio::test]
    async fn failures_never_abort_the_run() {
        let exec = Scripted::new(|s| if s.id == "s1" { Behavior::Panic } else { Behavior::Fail });
        let report = orch(exec.clone())
            .run(&chain_of(7), &Query::named("x"), &quick_policy())
            .await;
        assert_eq!(report.attempts.len(), 7);
        assert!(report.attempts.iter().all(|a| !a.success));
        let panicked = report.attempts.iter().find(|a| a.source_id == "s1").unwrap();
        assert_eq!(panicked.error.as_ref().unwrap().kind, ErrorKind::AttemptError);
        assert!(panicked.error.as_ref().unwrap().message.contains("panicked"));
        let orders: Vec<usize> = report.attempts.iter().map(|a| a.attempt_order).collect();
        assert_eq!(orders, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sources_time_out() {
        let exec = Scripted::new(|_| Behavior::Sleep(Duration::from_secs(60)));
        let policy = ExecutionPolicy {
            attempt_timeout: Duration::from_millis(100),
            ..quick_policy()
        };
        let report = orch(exec).run(&chain_of(4), &Query::named("x"), &policy).await;
        assert_eq!(report.attempts.len(), 4);
        assert!(report.attempts.iter().all(AttemptResult::is_timeout));
        assert!(report.attempts.iter().all(|a| !a.deadline_cut));
    }

    #[tokio::test]
    async fn next_batch_waits_for_previous_to_settle() {
        let exec = Scripted::new(|s| {
            if s.id == "s0" {
                Behavior::Sleep(Duration::from_millis(30))
            } else {
                Behavior::Fail
            }
        });
        orch(exec.clone())
            .run(&chain_of(6), &Query::named("x"), &quick_policy())
            .await;
        let log = exec.log.lock().unwrap().clone();
        let s0_end = log.iter().position(|e| e == "end:s0").unwrap();
        for id in ["s3", "s4", "s5"] {
            let start = log.iter().position(|e| e == &format!("start:{id}")).unwrap();
            assert!(start > s0_end, "{id} dispatched before batch 1 settled: {log:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delay_runs_between_batches_only() {
        let exec = Scripted::new(|_| Behavior::Fail);
        let policy = ExecutionPolicy {
            backoff: BackoffPolicy {
                base_delay_ms: 400,
                jitter_ms: 200,
            },
            ..ExecutionPolicy::default()
        };
        let o = Orchestrator::new(exec, Arc::new(FixedJitter(100)));
        let t0 = Instant::now();
        let report = o.run(&chain_of(9), &Query::named("x"), &policy).await;
        let elapsed = t0.elapsed();
        assert_eq!(report.batches_run, 3);
        assert!(elapsed >= Duration::from_millis(1_000), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_100), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn outer_deadline_returns_partial_results() {
        let exec = Scripted::new(|_| Behavior::Sleep(Duration::from_secs(1)));
        let policy = ExecutionPolicy {
            attempt_timeout: Duration::from_secs(5),
            success_threshold: 100,
            deadline: Some(Duration::from_millis(1_500)),
            ..quick_policy()
        };
        let report = orch(exec.clone())
            .run(&chain_of(9), &Query::named("x"), &policy)
            .await;
        assert_eq!(report.attempts.len(), 6);
        assert_eq!(report.successes(), 3);
        let cut: Vec<&AttemptResult> = report.attempts.iter().filter(|a| a.is_timeout()).collect();
        assert_eq!(cut.len(), 3);
        assert!(cut.iter().all(|a| a.deadline_cut));
        assert!(report.attempts.iter().filter(|a| a.success).all(|a| !a.deadline_cut));
        assert!(report.deadline_hit);
        assert_eq!(exec.calls.load(Ordering::SeqCst), 6);
    }
}
