//! # Source Health Tracker
//! Rolling per-source success/failure counters behind a mutex-guarded map.
//! Every fetch attempt records here; the runner flushes the snapshot into
//! the store when a run tears down.
//!
//! A source at or past the consecutive-failure threshold is soft-circuit-
//! broken: skipped for a cooloff period, never permanently disabled.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::model::SourceHealth;

#[derive(Debug, Default)]
pub struct SourceHealthTracker {
    inner: Mutex<HashMap<String, SourceHealth>>,
}

impl SourceHealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from previously persisted health rows so consecutive-failure
    /// streaks survive restarts.
    pub fn from_snapshot(snapshot: HashMap<String, SourceHealth>) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    pub fn record_success(&self, key: &str, now: DateTime<Utc>) {
        let mut map = self.inner.lock().expect("health mutex poisoned");
        let h = map.entry(key.to_string()).or_default();
        h.success_count += 1;
        h.consecutive_failures = 0;
        h.last_success_at = Some(now);
    }

    pub fn record_failure(&self, key: &str, now: DateTime<Utc>) {
        let mut map = self.inner.lock().expect("health mutex poisoned");
        let h = map.entry(key.to_string()).or_default();
        h.failure_count += 1;
        h.consecutive_failures += 1;
        h.last_failure_at = Some(now);
    }

    pub fn get(&self, key: &str) -> Option<SourceHealth> {
        self.inner
            .lock()
            .expect("health mutex poisoned")
            .get(key)
            .cloned()
    }

    /// Whether the source should sit this run out. True only while the
    /// streak is at/over the threshold AND the last failure is within the
    /// cooloff window; once the cooloff elapses the source gets retried.
    pub fn is_cooling(
        &self,
        key: &str,
        threshold: u32,
        cooloff_minutes: i64,
        now: DateTime<Utc>,
    ) -> bool {
        let map = self.inner.lock().expect("health mutex poisoned");
        let Some(h) = map.get(key) else {
            return false;
        };
        if h.consecutive_failures < threshold {
            return false;
        }
        match h.last_failure_at {
            Some(at) => now - at < Duration::minutes(cooloff_minutes),
            None => false,
        }
    }

    /// Flagged for deprioritization (regardless of cooloff).
    pub fn is_deprioritized(&self, key: &str, threshold: u32) -> bool {
        self.get(key)
            .map(|h| h.consecutive_failures >= threshold)
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> HashMap<String, SourceHealth> {
        self.inner.lock().expect("health mutex poisoned").clone()
    }
}
