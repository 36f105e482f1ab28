// tests/api_http.rs
// Router-level tests via tower::ServiceExt::oneshot; no sockets involved.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chrono::Utc;
use tokio::sync::watch;
use tower::util::ServiceExt;

use insight_pulse::api::{create_router, AppState};
use insight_pulse::config::PipelineConfig;
use insight_pulse::ingest::cache::SourceCache;
use insight_pulse::ingest::fetcher::Fetcher;
use insight_pulse::ingest::health::SourceHealthTracker;
use insight_pulse::ingest::proxy::ProxyPool;
use insight_pulse::model::{RunSummary, TriggerOrigin};
use insight_pulse::notify::WebhookAlertSink;
use insight_pulse::runner::PipelineDeps;
use insight_pulse::sources::SourceRegistry;
use insight_pulse::store::{MemoryStore, Store};
use insight_pulse::summarize::DisabledSummarizer;

fn empty_state() -> (AppState, Arc<dyn Store>) {
    let cfg = Arc::new(PipelineConfig {
        max_retries: 1,
        http_timeout: Duration::from_millis(300),
        user_sources_path: PathBuf::from("/nonexistent/user_sources.toml"),
        score_weights_path: PathBuf::from("/nonexistent/score_weights.json"),
        ..PipelineConfig::default()
    });
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let fetcher = Arc::new(Fetcher::new(
        &cfg,
        Arc::new(ProxyPool::new(vec![])),
        Arc::new(SourceCache::new()),
        Arc::new(SourceHealthTracker::new()),
    ));
    // Dropping the sender is fine: a closed shutdown channel reads as
    // "never signalled".
    let (_tx, shutdown) = watch::channel(false);
    let deps = PipelineDeps {
        cfg,
        store: Arc::clone(&store),
        fetcher,
        summarizer: Arc::new(DisabledSummarizer),
        alerts: Arc::new(WebhookAlertSink::new(None, false)),
        registry: Arc::new(SourceRegistry::with_builtin(
            vec![],
            PathBuf::from("/nonexistent/user_sources.toml"),
        )),
        shutdown,
    };
    (AppState { deps }, store)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let (state, _) = empty_state();
    let resp = create_router(state)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn trigger_returns_summary_without_body() {
    let (state, _) = empty_state();
    let resp = create_router(state)
        .oneshot(Request::post("/pipeline/run").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await;
    let summary: RunSummary = serde_json::from_value(v).unwrap();
    assert_eq!(summary.sources_selected, 0);
    assert_eq!(summary.insights_scored, 0);
}

#[tokio::test]
async fn trigger_accepts_window_overrides() {
    let (state, store) = empty_state();
    let resp = create_router(state)
        .oneshot(
            Request::post("/pipeline/run")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"paper_days": 21, "event_days": 30}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(store.last_run().is_some());
}

#[tokio::test]
async fn concurrent_run_is_refused_with_conflict() {
    let (state, store) = empty_state();
    // Occupy the run slot directly through the store.
    store.begin_run(TriggerOrigin::Scheduler, Utc::now()).unwrap();

    let resp = create_router(state)
        .oneshot(Request::post("/pipeline/run").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let v = body_json(resp).await;
    assert_eq!(v["category"], "run_in_progress");
}

#[tokio::test]
async fn feed_and_events_start_empty() {
    let (state, _) = empty_state();
    let router = create_router(state);

    let resp = router
        .clone()
        .oneshot(Request::get("/feed?limit=5").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!([]));

    let resp = router
        .oneshot(
            Request::get("/events?region=taiwan")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, serde_json::json!([]));
}

#[tokio::test]
async fn last_run_reflects_trigger_history() {
    let (state, _) = empty_state();
    let router = create_router(state);

    let resp = router
        .clone()
        .oneshot(Request::get("/runs/last").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(resp).await, serde_json::Value::Null);

    router
        .clone()
        .oneshot(Request::post("/pipeline/run").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let resp = router
        .oneshot(Request::get("/runs/last").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["status"], "success");
    assert_eq!(v["trigger"], "manual");
}

#[tokio::test]
async fn debug_counts_exposes_store_totals() {
    let (state, _) = empty_state();
    let resp = create_router(state)
        .oneshot(Request::get("/debug/counts").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let v = body_json(resp).await;
    assert_eq!(v["raw_items"], 0);
    assert_eq!(v["runs"], 0);
}
