//! run_log.rs: bounded in-memory log of recent resolution runs for diagnostics.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    pub user_location: String,
    pub chain_length: usize,
    pub successes: usize,
    pub failures: usize,
    pub early_terminated: bool,
    pub processing_time_ms: u64,
    /// Source ids in attempt order.
    pub attempted: Vec<String>,
}

#[derive(Debug)]
pub struct RunLog {
    inner: Mutex<Vec<RunSummary>>,
    cap: usize,
}

impl RunLog {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    pub fn push(&self, run: RunSummary) {
        let Ok(mut v) = self.inner.lock() else {
            tracing::warn!(target: "resolver", "run log mutex poisoned; dropping summary");
            return;
        };
        v.push(run);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Newest last.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<RunSummary> {
        let Ok(v) = self.inner.lock() else {
            return Vec::new();
        };
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(n: usize) -> RunSummary {
        RunSummary {
            timestamp: Utc::now(),
            user_location: "global".into(),
            chain_length: n,
            successes: 0,
            failures: n,
            early_terminated: false,
            processing_time_ms: 1,
            attempted: Vec::new(),
        }
    }

    #[test]
    fn keeps_only_the_newest() {
        let log = RunLog::with_capacity(3);
        for i in 0..5 {
            log.push(run(i));
        }
        let last = log.snapshot_last_n(10);
        assert_eq!(
            last.iter().map(|r| r.chain_length).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert_eq!(log.snapshot_last_n(1)[0].chain_length, 4);
    }
}
