//! model.rs — shared data model for the ingestion pipeline.
//!
//! These are the rows the pipeline owns end to end: raw sightings, their
//! normalized companions, scores, standalone events, per-source health and
//! the run ledger. Everything else (auth, subscriptions) lives outside this
//! crate and is never touched here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of an ingested item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Paper,
    Post,
    Event,
    Web,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Paper => "paper",
            ItemKind::Post => "post",
            ItemKind::Event => "event",
            ItemKind::Web => "web",
        }
    }
}

/// Feed category of a normalized item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AiTech,
    ProductBiz,
}

/// Content type of a normalized item. Events live in their own table, so
/// this is the non-event subset of [`ItemKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Paper,
    Post,
    Web,
}

impl From<ItemKind> for ContentType {
    fn from(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Paper => ContentType::Paper,
            ItemKind::Post => ContentType::Post,
            ItemKind::Event | ItemKind::Web => ContentType::Web,
        }
    }
}

/// Region classification applied to events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    Taiwan,
    Global,
}

/// Which fetch+parse variant a source uses. A closed set on purpose: the
/// pipeline dispatches on this tag, not on open-ended trait objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Rss,
    HtmlListing,
    JsonFeed,
}

/// Coarse bucket a source feeds into: events or insights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceBucket {
    Event,
    Insight,
}

/// A configured source. Long-lived, edited rarely; `authority_score`
/// (0–100) feeds the scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub url: String,
    pub adapter: AdapterKind,
    pub bucket: SourceBucket,
    pub kind_hint: ItemKind,
    pub authority_score: f32,
    #[serde(default = "Region::global")]
    pub region_hint: Region,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub user_submitted: bool,
}

impl Region {
    fn global() -> Region {
        Region::Global
    }
}

fn default_true() -> bool {
    true
}

/// First-sighting record of an item. `url` is globally unique; a re-fetch
/// of a known url updates content and `fetched_at` instead of inserting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawItem {
    pub id: u64,
    pub source_id: String,
    pub item_kind: ItemKind,
    pub external_id: Option<String>,
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub content_hash: String,
    #[serde(default)]
    pub meta: BTreeMap<String, String>,
}

/// Exactly one per RawItem. Created by the classifier (plus optional
/// summarization); `updated_at` bumps on reclassification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub id: u64,
    pub raw_id: u64,
    pub title: String,
    pub summary: String,
    pub why_it_matters: String,
    pub category: Category,
    pub content_type: ContentType,
    pub tags: Vec<String>,
    pub entities: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

/// Exactly one per NormalizedItem, recomputed every run for in-window
/// items. All four components are persisted for explainability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRow {
    pub item_id: u64,
    pub freshness_score: f32,
    pub authority_score: f32,
    pub signal_score: f32,
    pub diversity_penalty: f32,
    pub final_score: f32,
    pub scoring_reason: String,
}

/// Standalone event entity; parallel lifecycle to NormalizedItem but for
/// item_kind=event. `url` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub location: Option<String>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub url: String,
    pub organizer: Option<String>,
    pub source_domain: String,
    pub region: Region,
    pub tags: Vec<String>,
    pub score: f32,
}

/// Rolling per-source fetch counters. Mutated after every attempt, never
/// deleted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceHealth {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Where a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Scheduler,
    Manual,
}

impl TriggerOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerOrigin::Scheduler => "scheduler",
            TriggerOrigin::Manual => "manual",
        }
    }
}

/// Run state machine: `running → success | failed`, terminal once finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

/// One row per pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: u64,
    pub status: RunStatus,
    pub trigger: TriggerOrigin,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub summary: Option<RunSummary>,
    pub error_message: Option<String>,
}

/// Counts returned to the trigger caller and attached to the run row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sources_selected: usize,
    pub sources_fetched: usize,
    pub sources_failed: usize,
    pub sources_skipped_unhealthy: usize,
    pub items_fetched: usize,
    pub duplicates_skipped: usize,
    pub stale_served: usize,
    pub out_of_window: usize,
    pub domain_capped: usize,
    pub insights_scored: usize,
    pub events_scored: usize,
    pub duration_ms: u64,
}

/// Per-run window overrides accepted by the trigger operation. Absent
/// fields keep the configured default.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowOverrides {
    #[serde(default)]
    pub paper_days: Option<i64>,
    #[serde(default)]
    pub post_days: Option<i64>,
    #[serde(default)]
    pub event_days: Option<i64>,
    #[serde(default)]
    pub web_past_days: Option<i64>,
    #[serde(default)]
    pub web_future_days: Option<i64>,
}
