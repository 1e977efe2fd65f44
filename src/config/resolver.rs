// src/config/resolver.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adaptive::AdaptivePolicy;
use crate::backoff::BackoffPolicy;
use crate::orchestrator::ExecutionPolicy;
use crate::registry::MAX_ADJUSTMENT_STEP;
use crate::scoring::{PriorityWeights, DEFAULT_RESPONSE_TIME_CAP_MS};

pub const ENV_CONFIG_PATH: &str = "RESOLVER_CONFIG_PATH";
pub const ENV_SOURCES_PATH: &str = "RESOLVER_SOURCES_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/resolver.toml";
pub const DEFAULT_SOURCES_PATH: &str = "config/sources.json";

/// Hard ceiling on chain length regardless of config or request.
pub const MAX_ATTEMPTS_CEILING: usize = 50;

/// Largest usable ε: the biggest per-attempt delta is ±2ε, which must stay
/// within the registry's per-step bound.
pub const MAX_LEARNING_STEP: f32 = MAX_ADJUSTMENT_STEP / 2.0;

/// Service-wide defaults; requests may override a subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub max_attempts: usize,
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub success_threshold: usize,
    pub base_delay_ms: u64,
    pub jitter_ms: u64,
    pub response_time_cap_ms: u64,
    pub fast_response_ms: u64,
    pub high_confidence: f32,
    pub learning_step: f32,
    pub run_log_capacity: usize,
    pub weights: PriorityWeights,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            timeout_ms: 8_000,
            batch_size: 3,
            success_threshold: 5,
            base_delay_ms: 250,
            jitter_ms: 250,
            response_time_cap_ms: DEFAULT_RESPONSE_TIME_CAP_MS,
            fast_response_ms: 2_000,
            high_confidence: 0.8,
            learning_step: 0.02,
            run_log_capacity: 200,
            weights: PriorityWeights::default(),
        }
    }
}

impl ResolverSettings {
    /// Replace out-of-range values with defaults.
    pub fn sanitized(mut self) -> Self {
        let d = Self::default();
        if self.max_attempts == 0 {
            self.max_attempts = d.max_attempts;
        }
        self.max_attempts = self.max_attempts.min(MAX_ATTEMPTS_CEILING);
        if self.timeout_ms == 0 {
            self.timeout_ms = d.timeout_ms;
        }
        if self.batch_size == 0 {
            self.batch_size = d.batch_size;
        }
        if self.success_threshold == 0 {
            self.success_threshold = d.success_threshold;
        }
        if self.response_time_cap_ms == 0 {
            self.response_time_cap_ms = d.response_time_cap_ms;
        }
        if !(0.0..=1.0).contains(&self.high_confidence) {
            self.high_confidence = d.high_confidence;
        }
        if !(self.learning_step > 0.0 && self.learning_step <= MAX_LEARNING_STEP) {
            self.learning_step = d.learning_step;
        }
        if self.run_log_capacity == 0 {
            self.run_log_capacity = d.run_log_capacity;
        }
        self.weights = self.weights.sanitized();
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_delay_ms: self.base_delay_ms,
            jitter_ms: self.jitter_ms,
        }
    }

    pub fn execution_policy(&self) -> ExecutionPolicy {
        ExecutionPolicy {
            batch_size: self.batch_size,
            attempt_timeout: Duration::from_millis(self.timeout_ms),
            success_threshold: self.success_threshold,
            backoff: self.backoff(),
            deadline: None,
        }
    }

    pub fn adaptive_policy(&self) -> AdaptivePolicy {
        AdaptivePolicy {
            step: self.learning_step,
            fast_response_ms: self.fast_response_ms,
            high_confidence: self.high_confidence,
        }
    }
}

/// Load settings from an explicit TOML file.
pub fn load_settings_from(path: &Path) -> Result<ResolverSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading resolver settings from {}", path.display()))?;
    let s: ResolverSettings = toml::from_str(&content).context("parsing resolver settings toml")?;
    Ok(s.sanitized())
}

/// Load settings using env var + fallbacks:
/// 1) $RESOLVER_CONFIG_PATH (must exist)
/// 2) config/resolver.toml
/// 3) built-in defaults
pub fn load_settings_default() -> Result<ResolverSettings> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_settings_from(&pb);
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let p = PathBuf::from(DEFAULT_CONFIG_PATH);
    if p.exists() {
        return load_settings_from(&p);
    }
    Ok(ResolverSettings::default())
}

/// Where the in-memory registry is seeded from.
pub fn sources_path() -> PathBuf {
    std::env::var(ENV_SOURCES_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_SOURCES_PATH))
}
