//! # Proxy Pool
//! Rotating list of egress endpoints for the fetcher. Entries that keep
//! failing are skipped for a cooldown instead of being dropped, so a flaky
//! proxy can come back on its own.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Failures in a row before an entry is benched.
const SKIP_AFTER_FAILURES: u32 = 3;
/// How long a benched entry sits out.
const SKIP_MINUTES: i64 = 10;

#[derive(Debug, Clone)]
struct ProxyEntry {
    url: String,
    consecutive_failures: u32,
    skip_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ProxyPool {
    inner: Mutex<PoolState>,
}

#[derive(Debug, Default)]
struct PoolState {
    entries: Vec<ProxyEntry>,
    cursor: usize,
}

impl ProxyPool {
    pub fn new(urls: Vec<String>) -> Self {
        let entries = urls
            .into_iter()
            .map(|url| ProxyEntry {
                url,
                consecutive_failures: 0,
                skip_until: None,
            })
            .collect();
        Self {
            inner: Mutex::new(PoolState { entries, cursor: 0 }),
        }
    }

    /// Comma-separated `PROXY_POOL_URLS`. Empty env means direct egress.
    pub fn from_env() -> Self {
        let raw = std::env::var("PROXY_POOL_URLS").unwrap_or_default();
        let urls = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        Self::new(urls)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("proxy mutex poisoned").entries.is_empty()
    }

    /// Next live entry in rotation, skipping benched ones. `None` when the
    /// pool is empty or everything is cooling down (callers go direct).
    pub fn next_live(&self, now: DateTime<Utc>) -> Option<String> {
        let mut state = self.inner.lock().expect("proxy mutex poisoned");
        let n = state.entries.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let idx = (state.cursor + step) % n;
            let live = match state.entries[idx].skip_until {
                Some(until) => until <= now,
                None => true,
            };
            if live {
                state.cursor = (idx + 1) % n;
                return Some(state.entries[idx].url.clone());
            }
        }
        None
    }

    pub fn report_failure(&self, url: &str, now: DateTime<Utc>) {
        let mut state = self.inner.lock().expect("proxy mutex poisoned");
        if let Some(e) = state.entries.iter_mut().find(|e| e.url == url) {
            e.consecutive_failures += 1;
            if e.consecutive_failures >= SKIP_AFTER_FAILURES {
                e.skip_until = Some(now + Duration::minutes(SKIP_MINUTES));
                tracing::warn!(proxy = %url, "proxy benched after repeated failures");
            }
        }
    }

    pub fn report_success(&self, url: &str) {
        let mut state = self.inner.lock().expect("proxy mutex poisoned");
        if let Some(e) = state.entries.iter_mut().find(|e| e.url == url) {
            e.consecutive_failures = 0;
            e.skip_until = None;
        }
    }
}
