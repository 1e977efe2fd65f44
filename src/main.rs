//! Source Resolver: Binary Entrypoint
//! Boots the Axum HTTP server on Shuttle with the resolver wired in.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tracing is opt-in via RESOLVER_LOG:
///   - `1`    compact human-readable output
///   - `json` one JSON object per line
fn enable_tracing() {
    let mode = std::env::var("RESOLVER_LOG").unwrap_or_default();
    if mode != "1" && mode != "json" {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("resolver=info,orchestrator=info,registry=info,warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if mode == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_tracing();

    let router = source_resolver::app().await?;
    Ok(router.into())
}
