//! Insight Pulse — Binary Entrypoint
//! Boots the Axum HTTP server, wires the pipeline collaborators, spawns the
//! fixed-interval scheduler and handles graceful shutdown.

use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use insight_pulse::api::{create_router, AppState};
use insight_pulse::config::PipelineConfig;
use insight_pulse::ingest::cache::SourceCache;
use insight_pulse::ingest::fetcher::Fetcher;
use insight_pulse::ingest::health::SourceHealthTracker;
use insight_pulse::ingest::proxy::ProxyPool;
use insight_pulse::metrics::Metrics;
use insight_pulse::notify::WebhookAlertSink;
use insight_pulse::runner::PipelineDeps;
use insight_pulse::scheduler::spawn_scheduler;
use insight_pulse::sources::SourceRegistry;
use insight_pulse::store::{MemoryStore, Store};
use insight_pulse::summarize::build_summarizer;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("insight_pulse=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = Arc::new(PipelineConfig::from_env());
    let metrics = Metrics::init(cfg.run_interval.as_secs());

    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let cache = match &cfg.cache_dir {
        Some(dir) => Arc::new(SourceCache::with_spill_dir(dir)),
        None => Arc::new(SourceCache::new()),
    };
    // Seed health from prior persisted counters so failure streaks survive
    // restarts.
    let health = Arc::new(SourceHealthTracker::from_snapshot(store.health_snapshot()));
    let fetcher = Arc::new(Fetcher::new(
        &cfg,
        Arc::new(ProxyPool::from_env()),
        cache,
        health,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let deps = PipelineDeps {
        cfg: Arc::clone(&cfg),
        store,
        fetcher,
        summarizer: build_summarizer(),
        alerts: Arc::new(WebhookAlertSink::new(
            cfg.alert_webhook.clone(),
            cfg.notify_on_success,
        )),
        registry: Arc::new(SourceRegistry::new(cfg.user_sources_path.clone())),
        shutdown: shutdown_rx,
    };

    let scheduler = spawn_scheduler(deps.clone());

    let router = create_router(AppState { deps }).merge(metrics.router());
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!(addr = %cfg.listen_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    scheduler.abort();
    Ok(())
}
