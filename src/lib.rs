// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod adaptive;
pub mod api;
pub mod backoff;
pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod failure;
pub mod metrics;
pub mod orchestrator;
pub mod query;
pub mod registry;
pub mod resolver;
pub mod run_log;
pub mod scoring;
pub mod source;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::error::{ErrorKind, RegistryError, ResolveError};
pub use crate::executor::{HttpJsonExecutor, SourceData, SourceExecutor};
pub use crate::query::{Query, Rarity};
pub use crate::registry::{InMemorySourceRegistry, SourceFilter, SourceRegistry};
pub use crate::resolver::{RequestConfig, ResolveRequest, ResolveResponse, Resolver};
pub use crate::source::{SourceRecord, SourceType};

use axum::Router;
use std::sync::Arc;
use tracing::info;

/// Build the full service router from config on disk:
/// settings, the seeded registry, the HTTP executor and `/metrics`.
pub async fn app() -> anyhow::Result<Router> {
    let settings = config::load_settings_default()?;
    let registry = InMemorySourceRegistry::load_from_file(config::sources_path());
    info!(target: "registry", sources = registry.len(), "registry seeded");

    let executor = HttpJsonExecutor::new()?;
    let resolver = Resolver::new(Arc::new(registry), Arc::new(executor), settings);

    let metrics = crate::metrics::Metrics::init();
    Ok(router(AppState::new(resolver)).merge(metrics.router()))
}
