//! # Source Registry
//!
//! Resolves the candidate source set for a run: the built-in seed table
//! (intended ~80% of volume) unioned with active user-submitted sources
//! (~20%), de-duplicated by canonical URL. Pure function of stored
//! configuration; no network I/O happens here.
//!
//! User sources load from a TOML or JSON file; extra ad-hoc URLs can come
//! from `EXTRA_SOURCE_URLS`. Built-ins always win URL collisions.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::dedup::normalize_url;
use crate::model::{AdapterKind, ItemKind, Region, Source, SourceBucket};

const ENV_EXTRA_URLS: &str = "EXTRA_SOURCE_URLS";

pub struct SourceRegistry {
    builtin: Vec<Source>,
    user_sources_path: PathBuf,
}

impl SourceRegistry {
    pub fn new(user_sources_path: PathBuf) -> Self {
        Self {
            builtin: builtin_seed(),
            user_sources_path,
        }
    }

    /// Registry over an explicit source set. Used by tests and embedders
    /// that manage their own source tables.
    pub fn with_builtin(builtin: Vec<Source>, user_sources_path: PathBuf) -> Self {
        Self {
            builtin,
            user_sources_path,
        }
    }

    /// The resolved source set for one run.
    pub fn resolve(&self) -> Vec<Source> {
        let mut out: Vec<Source> = self.builtin.iter().filter(|s| s.active).cloned().collect();

        let mut extras = match load_user_sources(&self.user_sources_path) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, path = %self.user_sources_path.display(), "user sources unavailable");
                Vec::new()
            }
        };
        extras.extend(env_extra_sources());
        extras.retain(|s| s.active);

        // Keep the built-in/user balance: at most ~25% of the built-in count
        // comes from user submissions.
        let max_extra = (out.len() / 4).max(1);
        extras.truncate(max_extra);
        out.extend(extras);

        // Union by canonical URL; earlier entries (built-ins) win.
        let mut seen = std::collections::HashSet::new();
        out.retain(|s| seen.insert(normalize_url(&s.url)));
        out
    }
}

/// File shape for user-submitted sources.
#[derive(Debug, Deserialize)]
struct UserSourceFile {
    #[serde(default)]
    sources: Vec<UserSourceEntry>,
}

#[derive(Debug, Deserialize)]
struct UserSourceEntry {
    name: Option<String>,
    url: String,
    #[serde(default)]
    adapter: Option<AdapterKind>,
    #[serde(default)]
    active: Option<bool>,
}

/// Load user sources from a TOML or JSON file, keyed off the extension.
pub fn load_user_sources(path: &Path) -> Result<Vec<Source>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading user sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let parsed: UserSourceFile = match ext.as_str() {
        "json" => serde_json::from_str(&content).context("parsing user sources json")?,
        "toml" => toml::from_str(&content).context("parsing user sources toml")?,
        other => return Err(anyhow!("unsupported user sources format: .{other}")),
    };

    Ok(parsed
        .sources
        .into_iter()
        .enumerate()
        .filter(|(_, e)| !e.url.trim().is_empty())
        .map(|(i, e)| user_source(i, e))
        .collect())
}

fn user_source(index: usize, entry: UserSourceEntry) -> Source {
    let url = entry.url.trim().to_string();
    Source {
        id: format!("user-{index}"),
        name: entry.name.unwrap_or_else(|| "User source".to_string()),
        adapter: entry.adapter.unwrap_or(AdapterKind::HtmlListing),
        bucket: SourceBucket::Insight,
        kind_hint: ItemKind::Web,
        authority_score: 50.0,
        region_hint: Region::Global,
        active: entry.active.unwrap_or(true),
        user_submitted: true,
        url,
    }
}

fn env_extra_sources() -> Vec<Source> {
    let raw = std::env::var(ENV_EXTRA_URLS).unwrap_or_default();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .enumerate()
        .map(|(i, url)| {
            user_source(
                1000 + i,
                UserSourceEntry {
                    name: Some(url.to_string()),
                    url: url.to_string(),
                    adapter: None,
                    active: Some(true),
                },
            )
        })
        .collect()
}

fn seed(
    id: &str,
    name: &str,
    url: &str,
    adapter: AdapterKind,
    bucket: SourceBucket,
    kind: ItemKind,
    authority: f32,
    region: Region,
) -> Source {
    Source {
        id: id.to_string(),
        name: name.to_string(),
        url: url.to_string(),
        adapter,
        bucket,
        kind_hint: kind,
        authority_score: authority,
        region_hint: region,
        active: true,
        user_submitted: false,
    }
}

/// Built-in seed. Taiwan event calendars plus global research/insight feeds.
pub fn builtin_seed() -> Vec<Source> {
    use AdapterKind::{HtmlListing, JsonFeed, Rss};
    use Region::{Global, Taiwan};
    use SourceBucket::{Event, Insight};

    let ev = ItemKind::Event;
    let paper = ItemKind::Paper;
    let post = ItemKind::Post;
    let web = ItemKind::Web;

    vec![
        seed("accupass", "Accupass", "https://www.accupass.com/search?keyword=AI", HtmlListing, Event, ev, 85.0, Taiwan),
        seed("appworks-events", "AppWorks Events", "https://appworks.tw/events/", HtmlListing, Event, ev, 82.0, Taiwan),
        seed("meet-events", "Meet Startup Events", "https://meet.bnext.com.tw/events", HtmlListing, Event, ev, 80.0, Taiwan),
        seed("ithome-seminar", "iThome Seminar", "https://www.ithome.com.tw/seminar", HtmlListing, Event, ev, 70.0, Taiwan),
        seed("kktix-ai", "KKTIX AI Search", "https://kktix.com/events?search=ai", HtmlListing, Event, ev, 71.0, Taiwan),
        seed("innovex", "InnoVEX", "https://www.innovex.com.tw/", HtmlListing, Event, ev, 82.0, Taiwan),
        seed("computex", "COMPUTEX", "https://www.computextaipei.com.tw/", HtmlListing, Event, ev, 80.0, Taiwan),
        seed("gcp-events", "Google Cloud Events", "https://cloud.google.com/events", HtmlListing, Event, ev, 74.0, Global),
        seed("nvidia-events", "NVIDIA Events", "https://www.nvidia.com/en-us/events/", HtmlListing, Event, ev, 73.0, Global),
        seed("openai-blog", "OpenAI Blog", "https://openai.com/news/", HtmlListing, Insight, web, 90.0, Global),
        seed("anthropic-news", "Anthropic News", "https://www.anthropic.com/news", HtmlListing, Insight, web, 88.0, Global),
        seed("deepmind-blog", "Google DeepMind Blog", "https://deepmind.google/discover/blog/", HtmlListing, Insight, web, 89.0, Global),
        seed("hf-blog", "Hugging Face Blog", "https://huggingface.co/blog", HtmlListing, Insight, web, 87.0, Global),
        seed("hf-papers", "HuggingFace Papers", "https://huggingface.co/papers", HtmlListing, Insight, paper, 90.0, Global),
        seed("arxiv-cs-ai", "ArXiv cs.AI", "https://rss.arxiv.org/rss/cs.AI", Rss, Insight, paper, 93.0, Global),
        seed("tldr-ai", "TLDR AI", "https://tldr.tech/ai/archives", HtmlListing, Insight, post, 75.0, Global),
        seed("hn-front", "Hacker News", "https://hn.algolia.com/api/v1/search?tags=front_page", JsonFeed, Insight, post, 80.0, Global),
        seed("github-trending", "GitHub Trending", "https://github.com/trending", HtmlListing, Insight, post, 81.0, Global),
        seed("techorange", "TechOrange", "https://techorange.com/feed/", Rss, Insight, web, 70.0, Taiwan),
        seed("meet-news", "Meet Startup News", "https://meet.bnext.com.tw/", HtmlListing, Insight, web, 80.0, Taiwan),
    ]
}
