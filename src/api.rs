use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::PipelineError;
use crate::model::{PipelineRun, Region, RunSummary, TriggerOrigin, WindowOverrides};
use crate::runner::{run_pipeline, PipelineDeps};
use crate::store::{FeedEntry, StoreCounts};

#[derive(Clone)]
pub struct AppState {
    pub deps: PipelineDeps,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/pipeline/run", post(trigger_run))
        .route("/feed", get(feed))
        .route("/events", get(events))
        .route("/runs/last", get(last_run))
        .route("/debug/source-health", get(debug_source_health))
        .route("/debug/score-weights", get(debug_score_weights))
        .route("/debug/counts", get(debug_counts))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// Error body with a stable category tag, mirroring the pipeline's typed
/// failures.
#[derive(serde::Serialize)]
struct ApiError {
    error: String,
    category: &'static str,
}

fn error_response(err: PipelineError) -> (StatusCode, Json<ApiError>) {
    let status = match &err {
        PipelineError::RunInProgress => StatusCode::CONFLICT,
        PipelineError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
        PipelineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ApiError {
            error: err.to_string(),
            category: err.category(),
        }),
    )
}

/// "Run pipeline now", with optional per-kind window overrides in the body.
async fn trigger_run(
    State(state): State<AppState>,
    body: Option<Json<WindowOverrides>>,
) -> Result<Json<RunSummary>, (StatusCode, Json<ApiError>)> {
    let overrides = body.map(|Json(o)| o).unwrap_or_default();
    match run_pipeline(&state.deps, overrides, TriggerOrigin::Manual).await {
        Ok(summary) => Ok(Json(summary)),
        Err(e) => Err(error_response(e)),
    }
}

fn parse_limit(q: &HashMap<String, String>, default: usize) -> usize {
    q.get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
        .clamp(1, 200)
}

/// Scored insight feed; only rows from completed, persisted stages exist in
/// the store, so this never surfaces artifacts of an aborted run.
async fn feed(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<FeedEntry>> {
    let limit = parse_limit(&q, 30);
    Json(state.deps.store.top_insights(limit))
}

async fn events(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Json<Vec<crate::model::EventRecord>> {
    let limit = parse_limit(&q, 20);
    let region = match q.get("region").map(String::as_str) {
        Some("taiwan") => Some(Region::Taiwan),
        Some("global") => Some(Region::Global),
        _ => None,
    };
    Json(state.deps.store.top_events(region, limit))
}

async fn last_run(State(state): State<AppState>) -> Json<Option<PipelineRun>> {
    Json(state.deps.store.last_run())
}

async fn debug_source_health(
    State(state): State<AppState>,
) -> Json<HashMap<String, crate::model::SourceHealth>> {
    Json(state.deps.fetcher.health().snapshot())
}

/// The weights the next run would score with (reloaded from disk).
async fn debug_score_weights(State(state): State<AppState>) -> Json<crate::score::ScoreWeights> {
    Json(crate::score::ScoreWeights::load_from_file(
        &state.deps.cfg.score_weights_path,
    ))
}

async fn debug_counts(State(state): State<AppState>) -> Json<StoreCounts> {
    Json(state.deps.store.counts())
}
