// src/config.rs
// Env-driven pipeline tunables with sane defaults. Everything here is read
// once at startup; per-run knobs (window overrides) travel with the trigger.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Default per-kind windows: paper looks back 14 days, post 7, event looks
/// ahead 90, web spans past 7 to future 7.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct WindowDefaults {
    pub paper_past_days: i64,
    pub post_past_days: i64,
    pub event_future_days: i64,
    pub web_past_days: i64,
    pub web_future_days: i64,
}

impl Default for WindowDefaults {
    fn default() -> Self {
        Self {
            paper_past_days: 14,
            post_past_days: 7,
            event_future_days: 90,
            web_past_days: 7,
            web_future_days: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounded fetch worker pool size.
    pub fetch_concurrency: usize,
    /// Per-call fetch timeout.
    pub http_timeout: Duration,
    /// Retry attempts per fetch (including the first).
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Stale-fallback cache TTL.
    pub cache_ttl_hours: i64,
    /// Optional spill directory for the source cache.
    pub cache_dir: Option<PathBuf>,
    /// Sources at or above this many consecutive failures are deprioritized.
    pub unhealthy_threshold: u32,
    /// How long a deprioritized source sits out before being retried.
    pub unhealthy_cooloff_minutes: i64,
    pub windows: WindowDefaults,
    /// Scheduler period between runs.
    pub run_interval: Duration,
    /// Soft run timeout; only triggers alerting, never aborts stages.
    pub soft_timeout: Duration,
    /// Per-domain hard caps on persisted items within one run.
    pub source_cap_events: usize,
    pub source_cap_insights: usize,
    pub summarize_concurrency: usize,
    pub user_sources_path: PathBuf,
    pub score_weights_path: PathBuf,
    pub alert_webhook: Option<String>,
    pub notify_on_success: bool,
    pub listen_addr: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: 8,
            http_timeout: Duration::from_secs(8),
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_cap_ms: 6_000,
            backoff_jitter_ms: 300,
            cache_ttl_hours: 24,
            cache_dir: None,
            unhealthy_threshold: 5,
            unhealthy_cooloff_minutes: 120,
            windows: WindowDefaults::default(),
            run_interval: Duration::from_secs(6 * 3600),
            soft_timeout: Duration::from_secs(15 * 60),
            source_cap_events: 12,
            source_cap_insights: 5,
            summarize_concurrency: 4,
            user_sources_path: PathBuf::from("config/user_sources.toml"),
            score_weights_path: PathBuf::from("config/score_weights.json"),
            alert_webhook: None,
            notify_on_success: false,
            listen_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl PipelineConfig {
    /// Build from environment with defaults. Missing or malformed values
    /// fall back silently; this must never abort startup.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            fetch_concurrency: env_parse("FETCH_CONCURRENCY", d.fetch_concurrency).max(1),
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 8)),
            max_retries: env_parse("HTTP_MAX_RETRIES", d.max_retries).max(1),
            backoff_base_ms: env_parse("HTTP_BACKOFF_BASE_MS", d.backoff_base_ms),
            backoff_cap_ms: env_parse("HTTP_BACKOFF_CAP_MS", d.backoff_cap_ms),
            backoff_jitter_ms: env_parse("HTTP_BACKOFF_JITTER_MS", d.backoff_jitter_ms),
            cache_ttl_hours: env_parse("HTTP_CACHE_TTL_HOURS", d.cache_ttl_hours),
            cache_dir: std::env::var("SOURCE_CACHE_DIR").ok().map(PathBuf::from),
            unhealthy_threshold: env_parse(
                "SOURCE_UNHEALTHY_CONSECUTIVE_FAILURES",
                d.unhealthy_threshold,
            ),
            unhealthy_cooloff_minutes: env_parse(
                "SOURCE_UNHEALTHY_COOLOFF_MINUTES",
                d.unhealthy_cooloff_minutes,
            ),
            windows: WindowDefaults {
                paper_past_days: env_parse("WINDOW_PAPER_PAST_DAYS", 14),
                post_past_days: env_parse("WINDOW_POST_PAST_DAYS", 7),
                event_future_days: env_parse("WINDOW_EVENT_FUTURE_DAYS", 90),
                web_past_days: env_parse("WINDOW_WEB_PAST_DAYS", 7),
                web_future_days: env_parse("WINDOW_WEB_FUTURE_DAYS", 7),
            },
            run_interval: Duration::from_secs(env_parse("INGEST_INTERVAL_HOURS", 6u64) * 3600),
            soft_timeout: Duration::from_secs(env_parse("RUN_SOFT_TIMEOUT_SECS", 900)),
            source_cap_events: env_parse("SOURCE_CAP_EVENTS", d.source_cap_events),
            source_cap_insights: env_parse("SOURCE_CAP_INSIGHTS", d.source_cap_insights),
            summarize_concurrency: env_parse("SUMMARIZE_CONCURRENCY", d.summarize_concurrency)
                .max(1),
            user_sources_path: std::env::var("USER_SOURCES_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.user_sources_path),
            score_weights_path: std::env::var("SCORE_WEIGHTS_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.score_weights_path),
            alert_webhook: std::env::var("PIPELINE_ALERT_WEBHOOK")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            notify_on_success: std::env::var("PIPELINE_NOTIFY_ON_SUCCESS")
                .map(|v| v == "1")
                .unwrap_or(false),
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(d.listen_addr),
        }
    }
}
