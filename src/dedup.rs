//! # Deduplicator
//! Normalized-key + content-hash duplicate detection.
//!
//! The normalized key is a lower-cased, whitespace-collapsed title combined
//! with a URL stripped of tracking parameters and trailing slashes. Policy
//! against previously stored items:
//!   - same url, same content_hash  → refresh fetched_at only
//!   - same normalized key, new hash → content update of the existing row
//!   - otherwise                     → new raw item

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// Query parameters that identify a click, not a document.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "ref_src", "igshid"];

/// Canonicalize a URL for duplicate detection: drop the fragment, strip
/// tracking query parameters, trim trailing slashes, lowercase scheme+host.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();
    let url = url.split('#').next().unwrap_or(url);

    let (base, query) = match url.split_once('?') {
        Some((b, q)) => (b, Some(q)),
        None => (url, None),
    };

    let mut base = base.trim_end_matches('/').to_string();
    // Lowercase scheme and host only; paths stay case-sensitive.
    if let Some(pos) = base.find("://") {
        let after = pos + 3;
        let host_end = base[after..]
            .find('/')
            .map(|i| after + i)
            .unwrap_or(base.len());
        let lowered = format!(
            "{}{}",
            base[..host_end].to_ascii_lowercase(),
            &base[host_end..]
        );
        base = lowered;
    }

    let kept: Vec<&str> = query
        .map(|q| {
            q.split('&')
                .filter(|pair| {
                    let name = pair.split('=').next().unwrap_or("");
                    let name = name.to_ascii_lowercase();
                    !name.starts_with("utm_") && !TRACKING_PARAMS.contains(&name.as_str())
                })
                .collect()
        })
        .unwrap_or_default();

    if kept.is_empty() {
        base
    } else {
        format!("{}?{}", base, kept.join("&"))
    }
}

/// Lower-cased, whitespace-collapsed title.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The dedup key: canonical url + canonical title.
pub fn normalized_key(title: &str, url: &str) -> String {
    format!("{}|{}", normalize_url(url), normalize_title(title))
}

/// sha256 over title + content, hex-encoded.
pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Within-run duplicate filter. Store-level dedup (against prior runs)
/// happens in the raw-item upsert; this collapses the candidate set of a
/// single run so one document never counts twice for diversity purposes.
#[derive(Debug, Default)]
pub struct RunDedup {
    seen: HashSet<String>,
}

impl RunDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time a key is seen.
    pub fn first_sighting(&mut self, title: &str, url: &str) -> bool {
        self.seen.insert(normalized_key(title, url))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
