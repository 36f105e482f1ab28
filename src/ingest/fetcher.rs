//! # Fetcher
//! Retrieves raw content for a URL with bounded retries, exponential backoff
//! with jitter, proxy rotation, per-call timeouts and stale cache fallback.
//!
//! Every attempt (success or failure) updates the source health tracker.
//! Exhausting retries falls back to the last cached body for the URL; with
//! no cache entry the item is dropped for the run with a logged cause.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use rand::Rng;

use crate::config::PipelineConfig;
use crate::error::FetchError;
use crate::ingest::cache::SourceCache;
use crate::ingest::health::SourceHealthTracker;
use crate::ingest::proxy::ProxyPool;

/// Successful fetch result. `stale` marks bodies served from the cache
/// after live attempts were exhausted.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub status: u16,
    pub body: String,
    pub latency_ms: u64,
    pub stale: bool,
}

pub struct Fetcher {
    timeout: Duration,
    max_retries: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    backoff_jitter_ms: u64,
    cache_ttl_hours: i64,
    base_client: reqwest::Client,
    proxies: Arc<ProxyPool>,
    // One client per proxy endpoint, built lazily. reqwest binds proxies at
    // client construction.
    proxy_clients: Mutex<HashMap<String, reqwest::Client>>,
    cache: Arc<SourceCache>,
    health: Arc<SourceHealthTracker>,
}

impl Fetcher {
    pub fn new(
        cfg: &PipelineConfig,
        proxies: Arc<ProxyPool>,
        cache: Arc<SourceCache>,
        health: Arc<SourceHealthTracker>,
    ) -> Self {
        let base_client = reqwest::Client::builder()
            .user_agent("insight-pulse/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(cfg.http_timeout)
            .build()
            .unwrap_or_default();
        Self {
            timeout: cfg.http_timeout,
            max_retries: cfg.max_retries.max(1),
            backoff_base_ms: cfg.backoff_base_ms,
            backoff_cap_ms: cfg.backoff_cap_ms,
            backoff_jitter_ms: cfg.backoff_jitter_ms,
            cache_ttl_hours: cfg.cache_ttl_hours,
            base_client,
            proxies,
            proxy_clients: Mutex::new(HashMap::new()),
            cache,
            health,
        }
    }

    pub fn health(&self) -> &SourceHealthTracker {
        &self.health
    }

    pub fn cache(&self) -> &SourceCache {
        &self.cache
    }

    fn client_for(&self, proxy_url: Option<&str>) -> reqwest::Client {
        let Some(proxy_url) = proxy_url else {
            return self.base_client.clone();
        };
        let mut clients = self.proxy_clients.lock().expect("proxy clients poisoned");
        if let Some(c) = clients.get(proxy_url) {
            return c.clone();
        }
        let built = reqwest::Proxy::all(proxy_url)
            .and_then(|p| {
                reqwest::Client::builder()
                    .user_agent("insight-pulse/0.1")
                    .connect_timeout(Duration::from_secs(4))
                    .timeout(self.timeout)
                    .proxy(p)
                    .build()
            })
            .unwrap_or_else(|e| {
                tracing::warn!(proxy = %proxy_url, error = %e, "proxy client build failed, going direct");
                self.base_client.clone()
            });
        clients.insert(proxy_url.to_string(), built.clone());
        built
    }

    /// Exponential backoff capped, plus jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .backoff_cap_ms
            .min(self.backoff_base_ms.saturating_mul(1u64 << attempt.min(16)));
        let jitter = if self.backoff_jitter_ms > 0 {
            rand::rng().random_range(0..=self.backoff_jitter_ms)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    async fn attempt(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<(u16, String, u64), FetchError> {
        let t0 = Instant::now();
        let resp = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout.as_millis() as u64)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Err(FetchError::Status(status));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        Ok((status, body, t0.elapsed().as_millis() as u64))
    }

    /// Fetch one URL on behalf of `source_key` (health/cache identity).
    pub async fn fetch(&self, url: &str, source_key: &str) -> Result<FetchOutcome, FetchError> {
        let mut last_err = FetchError::Network("no attempt made".into());
        let mut proxy: Option<String> = self.proxies.next_live(Utc::now());

        for attempt in 0..self.max_retries {
            counter!("fetch_attempts_total").increment(1);
            let client = self.client_for(proxy.as_deref());

            match self.attempt(&client, url).await {
                Ok((status, body, latency_ms)) => {
                    let now = Utc::now();
                    self.health.record_success(source_key, now);
                    if let Some(p) = &proxy {
                        self.proxies.report_success(p);
                    }
                    self.cache.put(url, status, &body, now);
                    histogram!("fetch_latency_ms").record(latency_ms as f64);
                    return Ok(FetchOutcome {
                        status,
                        body,
                        latency_ms,
                        stale: false,
                    });
                }
                Err(err) => {
                    self.health.record_failure(source_key, Utc::now());
                    tracing::warn!(
                        url,
                        attempt,
                        error = %err,
                        via_proxy = proxy.as_deref().unwrap_or("direct"),
                        "fetch attempt failed"
                    );
                    if err.rotates_proxy() {
                        if let Some(p) = &proxy {
                            self.proxies.report_failure(p, Utc::now());
                        }
                        proxy = self.proxies.next_live(Utc::now());
                    }
                    let retryable = err.is_retryable();
                    last_err = err;
                    if !retryable || attempt + 1 == self.max_retries {
                        break;
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }

        counter!("fetch_failures_total").increment(1);

        // Live attempts exhausted: serve the last known good body if the
        // cache still has one inside the TTL.
        if let Some(entry) = self.cache.get(url, self.cache_ttl_hours, Utc::now()) {
            counter!("fetch_stale_served_total").increment(1);
            tracing::info!(url, error = %last_err, "serving stale cache fallback");
            return Ok(FetchOutcome {
                status: entry.status,
                body: entry.body,
                latency_ms: 0,
                stale: true,
            });
        }

        tracing::warn!(url, error = %last_err, "fetch exhausted with no cache entry, dropping");
        Err(last_err)
    }
}
