//! # Source Cache
//! Durable last-known-good response store keyed by URL. Successful fetches
//! write through; exhausted fetches read back the most recent body within
//! the TTL and serve it marked stale.
//!
//! In-memory map first, with an optional spill directory (one JSON file per
//! url hash) so bodies survive restarts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub url: String,
    pub status: u16,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct SourceCache {
    inner: Mutex<HashMap<String, CacheEntry>>,
    spill_dir: Option<PathBuf>,
}

fn file_key(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}.json", hasher.finalize())
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// With a spill directory. Directory creation is best-effort; a cache
    /// that cannot spill still works in memory.
    pub fn with_spill_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, dir = %dir.display(), "cache spill dir unavailable");
            return Self::new();
        }
        Self {
            inner: Mutex::new(HashMap::new()),
            spill_dir: Some(dir),
        }
    }

    pub fn put(&self, url: &str, status: u16, body: &str, now: DateTime<Utc>) {
        let entry = CacheEntry {
            url: url.to_string(),
            status,
            body: body.to_string(),
            fetched_at: now,
        };
        if let Some(dir) = &self.spill_dir {
            let path = dir.join(file_key(url));
            match serde_json::to_vec(&entry) {
                Ok(bytes) => {
                    if let Err(e) = std::fs::write(&path, bytes) {
                        tracing::warn!(error = %e, url, "cache spill write failed");
                    }
                }
                Err(e) => tracing::warn!(error = %e, url, "cache entry serialize failed"),
            }
        }
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .insert(url.to_string(), entry);
    }

    /// Last-known-good body for `url`, if one exists within `max_age_hours`.
    pub fn get(&self, url: &str, max_age_hours: i64, now: DateTime<Utc>) -> Option<CacheEntry> {
        let fresh_enough =
            |e: &CacheEntry| now - e.fetched_at <= Duration::hours(max_age_hours.max(0));

        if let Some(entry) = self
            .inner
            .lock()
            .expect("cache mutex poisoned")
            .get(url)
            .cloned()
        {
            return fresh_enough(&entry).then_some(entry);
        }

        // Miss in memory: try the spill file once and repopulate.
        let dir = self.spill_dir.as_ref()?;
        let bytes = std::fs::read(dir.join(file_key(url))).ok()?;
        let entry: CacheEntry = serde_json::from_slice(&bytes).ok()?;
        if !fresh_enough(&entry) {
            return None;
        }
        self.inner
            .lock()
            .expect("cache mutex poisoned")
            .insert(url.to_string(), entry.clone());
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
