//! Adaptive ranking: turn attempt outcomes into small, bounded
//! `success_rate` nudges and write them back through the registry.
//!
//! Success: `+step`, `+step/2` if fast, `+step/2` if the data is high-confidence.
//! Failure: `-step`, another `-step` on timeout.
//! Attempts cut short by the caller's outer deadline are not fed back.
//!
//! Write failures are logged and counted; they never fail the run.

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::orchestrator::AttemptResult;
use crate::registry::{Adjustment, SourceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptivePolicy {
    /// Base step ε.
    pub step: f32,
    /// Successes faster than this earn the speed bonus.
    pub fast_response_ms: u64,
    /// Data confidence at or above this earns the confidence bonus.
    pub high_confidence: f32,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            step: 0.02,
            fast_response_ms: 2_000,
            high_confidence: 0.8,
        }
    }
}

/// Signed `success_rate` delta for one attempt.
pub fn delta_for(attempt: &AttemptResult, policy: &AdaptivePolicy) -> f32 {
    let eps = policy.step;
    if attempt.deadline_cut {
        0.0
    } else if attempt.success {
        let mut d = eps;
        if attempt.response_time_ms < policy.fast_response_ms {
            d += eps / 2.0;
        }
        let confident = attempt
            .data
            .as_ref()
            .and_then(|d| d.confidence)
            .is_some_and(|c| c >= policy.high_confidence);
        if confident {
            d += eps / 2.0;
        }
        d
    } else if attempt.is_timeout() {
        -2.0 * eps
    } else {
        -eps
    }
}

/// `None` when the attempt carries no signal about the source.
pub fn adjustment_for(attempt: &AttemptResult, policy: &AdaptivePolicy) -> Option<Adjustment> {
    if attempt.deadline_cut {
        return None;
    }
    let adj = Adjustment::delta(delta_for(attempt, policy));
    Some(if attempt.success {
        adj.with_response_time(attempt.response_time_ms)
    } else {
        adj
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub applied: usize,
    pub failed: usize,
    /// Attempts with no signal (outer deadline), left untouched.
    pub skipped: usize,
}

impl UpdateSummary {
    /// At least one adjustment was persisted.
    pub fn updated(&self) -> bool {
        self.applied > 0
    }
}

/// Apply one adjustment per informative attempt.
pub async fn apply_outcomes(
    registry: &dyn SourceRegistry,
    attempts: &[AttemptResult],
    policy: &AdaptivePolicy,
) -> UpdateSummary {
    let mut summary = UpdateSummary::default();
    for attempt in attempts {
        let Some(adj) = adjustment_for(attempt, policy) else {
            summary.skipped += 1;
            continue;
        };
        match registry.apply_adjustment(&attempt.source_id, adj).await {
            Ok(rec) => {
                summary.applied += 1;
                debug!(
                    target: "registry",
                    source_id = %attempt.source_id,
                    delta = adj.success_rate_delta,
                    success_rate = rec.success_rate,
                    "adjusted"
                );
            }
            Err(e) => {
                summary.failed += 1;
                counter!("registry_update_failures_total").increment(1);
                warn!(
                    target: "registry",
                    source_id = %attempt.source_id,
                    error = %e,
                    kind = "RegistryUpdateFailure",
                    "adaptive adjustment not persisted"
                );
            }
        }
    }
    summary
}
