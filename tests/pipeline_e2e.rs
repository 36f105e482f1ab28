// tests/pipeline_e2e.rs
// Full pipeline runs against local fixture HTTP servers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use insight_pulse::config::PipelineConfig;
use insight_pulse::ingest::cache::SourceCache;
use insight_pulse::ingest::fetcher::Fetcher;
use insight_pulse::ingest::health::SourceHealthTracker;
use insight_pulse::ingest::proxy::ProxyPool;
use insight_pulse::model::{
    AdapterKind, ItemKind, Region, RunStatus, Source, SourceBucket, TriggerOrigin, WindowOverrides,
};
use insight_pulse::notify::WebhookAlertSink;
use insight_pulse::runner::{run_pipeline, PipelineDeps};
use insight_pulse::sources::SourceRegistry;
use insight_pulse::store::{MemoryStore, Store};
use insight_pulse::summarize::{DisabledSummarizer, FixedSummarizer, ItemSummary, SummarizeOutcome};

fn rss_feed(items: &[(&str, String)], pub_date: DateTime<Utc>) -> String {
    let mut s = String::from(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Fixture</title>"#,
    );
    for (title, url) in items {
        s.push_str(&format!(
            "<item><title>{title}</title><link>{url}</link><pubDate>{}</pubDate><description>agent benchmark notes</description></item>",
            pub_date.to_rfc2822()
        ));
    }
    s.push_str("</channel></rss>");
    s
}

/// Serve a fixed body on /feed.xml from an ephemeral port.
async fn serve_feed(body: String) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route(
        "/feed.xml",
        get(move || {
            let body = body.clone();
            async move { body }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/feed.xml")
}

fn rss_source(id: &str, url: &str, kind: ItemKind, authority: f32) -> Source {
    Source {
        id: id.to_string(),
        name: id.to_string(),
        url: url.to_string(),
        adapter: AdapterKind::Rss,
        bucket: SourceBucket::Insight,
        kind_hint: kind,
        authority_score: authority,
        region_hint: Region::Global,
        active: true,
        user_submitted: false,
    }
}

fn quick_config() -> PipelineConfig {
    PipelineConfig {
        max_retries: 2,
        backoff_base_ms: 1,
        backoff_cap_ms: 2,
        backoff_jitter_ms: 0,
        http_timeout: Duration::from_millis(800),
        score_weights_path: PathBuf::from("/nonexistent/score_weights.json"),
        user_sources_path: PathBuf::from("/nonexistent/user_sources.toml"),
        ..PipelineConfig::default()
    }
}

struct Harness {
    deps: PipelineDeps,
    store: Arc<dyn Store>,
    cache: Arc<SourceCache>,
    health: Arc<SourceHealthTracker>,
    shutdown_tx: watch::Sender<bool>,
}

fn harness(cfg: PipelineConfig, sources: Vec<Source>) -> Harness {
    harness_with_summarizer(cfg, sources, Arc::new(DisabledSummarizer))
}

fn harness_with_summarizer(
    cfg: PipelineConfig,
    sources: Vec<Source>,
    summarizer: Arc<dyn insight_pulse::summarize::Summarizer>,
) -> Harness {
    let cfg = Arc::new(cfg);
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cache = Arc::new(SourceCache::new());
    let health = Arc::new(SourceHealthTracker::new());
    let fetcher = Arc::new(Fetcher::new(
        &cfg,
        Arc::new(ProxyPool::new(vec![])),
        Arc::clone(&cache),
        Arc::clone(&health),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let user_path = cfg.user_sources_path.clone();
    let deps = PipelineDeps {
        cfg,
        store: Arc::clone(&store),
        fetcher,
        summarizer,
        alerts: Arc::new(WebhookAlertSink::new(None, false)),
        registry: Arc::new(SourceRegistry::with_builtin(sources, user_path)),
        shutdown: shutdown_rx,
    };
    Harness {
        deps,
        store,
        cache,
        health,
        shutdown_tx,
    }
}

#[tokio::test]
async fn authority_ranks_strictly_above_all_else_equal() {
    let published = Utc::now() - chrono::Duration::days(1);

    // Two sources, five identically-shaped items each; only authority differs.
    let high_items: Vec<(&str, String)> = (0..5)
        .map(|i| ("Agent benchmark update", format!("https://high.test/items/{i}")))
        .collect();
    let low_items: Vec<(&str, String)> = (0..5)
        .map(|i| ("Agent benchmark update", format!("https://low.test/items/{i}")))
        .collect();

    let high_url = serve_feed(rss_feed(&high_items, published)).await;
    let low_url = serve_feed(rss_feed(&low_items, published)).await;

    let h = harness(
        quick_config(),
        vec![
            rss_source("high", &high_url, ItemKind::Post, 80.0),
            rss_source("low", &low_url, ItemKind::Post, 20.0),
        ],
    );

    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(summary.items_fetched, 10);
    assert_eq!(summary.insights_scored, 10);

    let feed = h.store.top_insights(10);
    assert_eq!(feed.len(), 10);
    for entry in &feed[..5] {
        assert!(entry.url.contains("high.test"), "expected high-authority first: {}", entry.url);
    }
    for entry in &feed[5..] {
        assert!(entry.url.contains("low.test"));
    }
    let min_high = feed[..5].iter().map(|e| e.final_score).fold(f32::MAX, f32::min);
    let max_low = feed[5..].iter().map(|e| e.final_score).fold(f32::MIN, f32::max);
    assert!(min_high > max_low);
}

#[tokio::test]
async fn normalized_rows_have_exactly_one_raw_and_one_score() {
    let published = Utc::now() - chrono::Duration::days(1);
    let items: Vec<(&str, String)> = (0..4)
        .map(|i| ("Open-source model training run", format!("https://feed.test/post/{i}")))
        .collect();
    let url = serve_feed(rss_feed(&items, published)).await;
    let h = harness(quick_config(), vec![rss_source("feed", &url, ItemKind::Post, 70.0)]);

    run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();

    let counts = h.store.counts();
    assert_eq!(counts.raw_items, 4);
    assert_eq!(counts.normalized_items, 4);
    assert_eq!(counts.scores, 4);
    for i in 0..4 {
        let raw = h
            .store
            .get_raw_by_url(&format!("https://feed.test/post/{i}"))
            .expect("raw row exists");
        let norm = h.store.normalized_for_raw(raw.id).expect("normalized companion");
        assert!(h.store.score_for_item(norm.id).is_some(), "score companion");
    }
}

#[tokio::test]
async fn rescoring_unchanged_items_is_idempotent() {
    let published = Utc::now() - chrono::Duration::days(2);
    let items: Vec<(&str, String)> = (0..3)
        .map(|i| ("LLM inference notes", format!("https://feed.test/n/{i}")))
        .collect();
    let url = serve_feed(rss_feed(&items, published)).await;
    let h = harness(quick_config(), vec![rss_source("feed", &url, ItemKind::Post, 60.0)]);

    run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    let first: Vec<(String, f32)> = h
        .store
        .top_insights(10)
        .into_iter()
        .map(|e| (e.url, e.final_score))
        .collect();

    run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    let second: Vec<(String, f32)> = h
        .store
        .top_insights(10)
        .into_iter()
        .map(|e| (e.url, e.final_score))
        .collect();

    assert_eq!(first, second);
    // re-ingest updated rows instead of duplicating
    assert_eq!(h.store.counts().raw_items, 3);
    assert_eq!(h.store.counts().normalized_items, 3);
}

#[tokio::test]
async fn paper_window_override_includes_old_items() {
    let published = Utc::now() - chrono::Duration::days(20);
    let items = vec![("Benchmark paper survey", "https://papers.test/abs/1".to_string())];
    let url = serve_feed(rss_feed(&items, published)).await;

    let h = harness(quick_config(), vec![rss_source("papers", &url, ItemKind::Paper, 90.0)]);

    // Default 14-day window: excluded, raw retained.
    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(summary.out_of_window, 1);
    assert_eq!(summary.insights_scored, 0);
    assert!(h.store.get_raw_by_url("https://papers.test/abs/1").is_some());
    assert_eq!(h.store.counts().normalized_items, 0);

    // Override to 21 days: included.
    let summary = run_pipeline(
        &h.deps,
        WindowOverrides {
            paper_days: Some(21),
            ..Default::default()
        },
        TriggerOrigin::Manual,
    )
    .await
    .unwrap();
    assert_eq!(summary.out_of_window, 0);
    assert_eq!(summary.insights_scored, 1);
}

#[tokio::test]
async fn stale_cache_fallback_keeps_the_run_alive() {
    let cfg = PipelineConfig {
        max_retries: 3,
        ..quick_config()
    };
    // Nothing listens on the discard port; every attempt fails.
    let dead_url = "http://127.0.0.1:9/feed.xml";
    let published = Utc::now() - chrono::Duration::days(1);
    let body = rss_feed(
        &[("Cached agent notes", "https://cached.test/a".to_string())],
        published,
    );

    let h = harness(cfg, vec![rss_source("flaky", dead_url, ItemKind::Post, 50.0)]);
    h.cache.put(dead_url, 200, &body, Utc::now());

    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();

    assert_eq!(summary.sources_failed, 0);
    assert_eq!(summary.stale_served, 1);
    assert_eq!(summary.insights_scored, 1);
    let raw = h.store.get_raw_by_url("https://cached.test/a").unwrap();
    assert_eq!(raw.meta.get("stale").map(String::as_str), Some("true"));
    // every live attempt recorded a failure
    assert_eq!(h.health.get("flaky").unwrap().consecutive_failures, 3);
}

#[tokio::test]
async fn five_consecutive_failures_deprioritize_the_source() {
    let cfg = PipelineConfig {
        max_retries: 5,
        ..quick_config()
    };
    let h = harness(
        cfg,
        vec![rss_source("dead", "http://127.0.0.1:9/feed.xml", ItemKind::Post, 50.0)],
    );

    // No cache entry: the source is dropped for the run, the run still
    // completes.
    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(summary.sources_failed, 1);

    let health = h.health.get("dead").unwrap();
    assert_eq!(health.consecutive_failures, 5);
    assert!(h.health.is_deprioritized("dead", 5));
    // persisted at run teardown
    assert_eq!(h.store.health_snapshot()["dead"].consecutive_failures, 5);

    // Next run: the soft circuit breaker sits the source out.
    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(summary.sources_skipped_unhealthy, 1);
    assert_eq!(summary.sources_fetched, 0);
}

#[tokio::test]
async fn within_run_duplicates_collapse() {
    let published = Utc::now() - chrono::Duration::days(1);
    // Same document twice: identical title, url variants of one another.
    let items = vec![
        ("Agent release notes", "https://feed.test/x".to_string()),
        ("Agent release notes", "https://feed.test/x?utm_source=rss".to_string()),
        ("Different story", "https://feed.test/y".to_string()),
    ];
    let url = serve_feed(rss_feed(&items, published)).await;
    let h = harness(quick_config(), vec![rss_source("feed", &url, ItemKind::Post, 60.0)]);

    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(summary.items_fetched, 3);
    assert_eq!(summary.duplicates_skipped, 1);
    assert_eq!(summary.insights_scored, 2);
    assert_eq!(h.store.counts().raw_items, 2);
}

#[tokio::test]
async fn summarizer_output_flows_into_normalized_rows() {
    let published = Utc::now() - chrono::Duration::days(1);
    let items = vec![("Model launch recap", "https://feed.test/launch".to_string())];
    let url = serve_feed(rss_feed(&items, published)).await;

    let summarizer = Arc::new(FixedSummarizer {
        outcome: SummarizeOutcome::Summary(ItemSummary {
            summary: "Short digest of the launch.".to_string(),
            why_it_matters: "Signals a new pricing war.".to_string(),
            category: Some(insight_pulse::model::Category::AiTech),
            tags: vec!["launch".to_string()],
        }),
    });
    let h = harness_with_summarizer(
        quick_config(),
        vec![rss_source("feed", &url, ItemKind::Post, 60.0)],
        summarizer,
    );

    run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();

    let feed = h.store.top_insights(1);
    // normalization trims trailing sentence punctuation
    assert_eq!(feed[0].summary, "Short digest of the launch");
    assert_eq!(feed[0].why_it_matters, "Signals a new pricing war");
    assert_eq!(feed[0].category, insight_pulse::model::Category::AiTech);
    assert_eq!(feed[0].tags, vec!["launch".to_string()]);
}

#[tokio::test]
async fn shutdown_signal_records_failed_run_with_cause() {
    let published = Utc::now() - chrono::Duration::days(1);
    let items = vec![("Agent notes", "https://feed.test/a".to_string())];
    let url = serve_feed(rss_feed(&items, published)).await;
    let h = harness(quick_config(), vec![rss_source("feed", &url, ItemKind::Post, 60.0)]);

    h.shutdown_tx.send(true).unwrap();
    let err = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap_err();
    assert_eq!(err.category(), "cancelled");

    let run = h.store.last_run().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error_message.unwrap().contains("shutdown"));
}

#[tokio::test]
async fn events_land_in_the_event_table_with_regions() {
    let start = Utc::now() + chrono::Duration::days(14);
    let items = vec![
        ("AI 論壇 workshop 報名", "https://events.test.tw/forum".to_string()),
        ("Global AI summit keynote", "https://summit.test/keynote".to_string()),
    ];
    let url = serve_feed(rss_feed(&items, start)).await;

    let mut source = rss_source("events", &url, ItemKind::Event, 80.0);
    source.bucket = SourceBucket::Event;
    source.region_hint = Region::Global;

    let h = harness(quick_config(), vec![source]);
    let summary = run_pipeline(&h.deps, WindowOverrides::default(), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert_eq!(summary.events_scored, 2);
    assert_eq!(summary.insights_scored, 0);

    let taiwan = h.store.top_events(Some(Region::Taiwan), 10);
    assert_eq!(taiwan.len(), 1);
    assert!(taiwan[0].url.contains("events.test.tw"));
    let all = h.store.top_events(None, 10);
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|e| e.start_at.is_some() && e.score > 0.0));
}
