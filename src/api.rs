use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query as UrlQuery, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::{ErrorKind, ResolveError};
use crate::registry::SourceFilter;
use crate::resolver::{ResolveRequest, ResolveResponse, Resolver};
use crate::run_log::RunSummary;
use crate::source::{SourceRecord, SourceType};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<Resolver>,
}

impl AppState {
    pub fn new(resolver: Resolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/resolve", post(resolve))
        .route("/debug/sources", get(debug_sources))
        .route("/debug/runs", get(debug_runs))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn status_for(resp: &ResolveResponse) -> StatusCode {
    match resp.error_kind() {
        None => StatusCode::OK,
        Some(ErrorKind::InvalidQuery) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(ErrorKind::NoSourcesAvailable) => StatusCode::SERVICE_UNAVAILABLE,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn resolve(
    State(state): State<AppState>,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> (StatusCode, Json<ResolveResponse>) {
    let resp = match body {
        Ok(Json(req)) => state.resolver.resolve(req).await,
        // Malformed bodies still get the structured answer.
        Err(rej) => ResolveResponse::rejected(&ResolveError::InvalidQuery(rej.body_text()), "", 0),
    };
    (status_for(&resp), Json(resp))
}

fn parse_type(raw: &str) -> Option<SourceType> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())).ok()
}

/// `GET /debug/sources?type=forum,dealer&country=usa`
async fn debug_sources(
    State(state): State<AppState>,
    UrlQuery(q): UrlQuery<HashMap<String, String>>,
) -> Result<Json<Vec<SourceRecord>>, (StatusCode, String)> {
    let split = |key: &str| -> Vec<String> {
        q.get(key)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    };
    let mut source_types = Vec::new();
    for t in split("type") {
        match parse_type(&t) {
            Some(st) => source_types.push(st),
            None => return Err((StatusCode::BAD_REQUEST, format!("unknown source type '{t}'"))),
        }
    }
    let filter = SourceFilter {
        source_types,
        countries: split("country"),
    };
    state
        .resolver
        .registry()
        .list_active(&filter)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}

/// `GET /debug/runs?n=20`
async fn debug_runs(
    State(state): State<AppState>,
    UrlQuery(q): UrlQuery<HashMap<String, String>>,
) -> Json<Vec<RunSummary>> {
    let n = q.get("n").and_then(|v| v.parse().ok()).unwrap_or(20);
    Json(state.resolver.run_log().snapshot_last_n(n))
}
