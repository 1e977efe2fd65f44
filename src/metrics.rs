use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<Option<PrometheusHandle>> = OnceCell::new();

pub struct Metrics {
    pub handle: Option<PrometheusHandle>,
}

impl Metrics {
    /// Install the Prometheus recorder once per process and describe the series.
    /// If another recorder is already installed, exposition is disabled.
    pub fn init() -> Self {
        let handle = HANDLE
            .get_or_init(|| {
                let handle = match PrometheusBuilder::new().install_recorder() {
                    Ok(h) => Some(h),
                    Err(e) => {
                        tracing::warn!(error = %e, "prometheus recorder not installed");
                        None
                    }
                };
                describe();
                handle
            })
            .clone();
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.map(|h| h.render()).unwrap_or_default() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("resolver_runs_total", "Resolutions that executed a chain.");
    describe_counter!(
        "resolver_rejected_total",
        "Resolutions rejected before execution (InvalidQuery / NoSourcesAvailable)."
    );
    describe_counter!("resolver_attempts_total", "Source attempts by outcome.");
    describe_histogram!("resolver_attempt_ms", "Per-attempt latency in milliseconds.");
    describe_counter!(
        "resolver_early_terminations_total",
        "Runs that stopped dispatching on the success threshold."
    );
    describe_counter!(
        "registry_update_failures_total",
        "Adaptive adjustments that failed to persist."
    );
    describe_gauge!("resolver_last_run_ts", "Unix ts of the last finished resolution.");
}
