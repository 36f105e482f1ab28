//! # Store
//! Persistence boundary of the pipeline. The pipeline exclusively writes
//! raw items, normalized items, scores, events, source health and run rows
//! through this trait; it never touches auth or subscription state.
//!
//! All writes are upserts: unique-constraint conflicts resolve to updates
//! of the existing row (idempotent success), matching the dedup policy.
//! `MemoryStore` is the in-process implementation behind a single mutex;
//! call paths are short and synchronous, so stages never suspend in here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::dedup::normalized_key;
use crate::error::StoreError;
use crate::model::{
    EventRecord, NormalizedItem, PipelineRun, RawItem, RunStatus, RunSummary, ScoreRow,
    SourceHealth, TriggerOrigin,
};

/// How a raw upsert resolved against prior sightings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawUpsert {
    /// First sighting; a new row exists.
    Inserted(u64),
    /// Known normalized key or url with a different content hash; the
    /// existing row was rewritten in place.
    Updated(u64),
    /// Known url, identical content hash; only fetched_at was refreshed.
    Refreshed(u64),
}

impl RawUpsert {
    pub fn id(&self) -> u64 {
        match self {
            RawUpsert::Inserted(id) | RawUpsert::Updated(id) | RawUpsert::Refreshed(id) => *id,
        }
    }
}

/// Fields the pipeline supplies for a raw upsert; the store assigns ids.
#[derive(Debug, Clone)]
pub struct NewRawItem {
    pub source_id: String,
    pub item_kind: crate::model::ItemKind,
    pub external_id: Option<String>,
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub meta: BTreeMap<String, String>,
}

/// Joined row served to feed consumers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FeedEntry {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub why_it_matters: String,
    pub category: crate::model::Category,
    pub content_type: crate::model::ContentType,
    pub tags: Vec<String>,
    pub final_score: f32,
    pub scoring_reason: String,
}

pub trait Store: Send + Sync {
    fn upsert_raw_item(&self, item: NewRawItem, now: DateTime<Utc>)
        -> Result<RawUpsert, StoreError>;
    fn upsert_normalized(&self, item: NormalizedItem) -> Result<u64, StoreError>;
    fn upsert_score(&self, score: ScoreRow) -> Result<(), StoreError>;
    fn upsert_event(&self, event: EventRecord) -> Result<u64, StoreError>;

    fn health_snapshot(&self) -> HashMap<String, SourceHealth>;
    fn flush_health(&self, snapshot: HashMap<String, SourceHealth>) -> Result<(), StoreError>;

    /// Overlap guard: refuses while another run is `running`.
    fn begin_run(&self, trigger: TriggerOrigin, now: DateTime<Utc>) -> Result<u64, StoreError>;
    fn finish_run(
        &self,
        run_id: u64,
        status: RunStatus,
        summary: Option<RunSummary>,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    fn get_raw_by_url(&self, url: &str) -> Option<RawItem>;
    fn normalized_for_raw(&self, raw_id: u64) -> Option<NormalizedItem>;
    fn score_for_item(&self, item_id: u64) -> Option<ScoreRow>;
    fn last_run(&self) -> Option<PipelineRun>;
    fn top_insights(&self, limit: usize) -> Vec<FeedEntry>;
    fn top_events(&self, region: Option<crate::model::Region>, limit: usize) -> Vec<EventRecord>;
    fn counts(&self) -> StoreCounts;
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StoreCounts {
    pub raw_items: usize,
    pub normalized_items: usize,
    pub scores: usize,
    pub events: usize,
    pub runs: usize,
}

#[derive(Default)]
struct Inner {
    raw: BTreeMap<u64, RawItem>,
    raw_by_url: HashMap<String, u64>,
    raw_by_ext: HashMap<(String, String), u64>,
    raw_by_key: HashMap<String, u64>,
    normalized: BTreeMap<u64, NormalizedItem>,
    norm_by_raw: HashMap<u64, u64>,
    scores: HashMap<u64, ScoreRow>,
    events: BTreeMap<u64, EventRecord>,
    event_by_url: HashMap<String, u64>,
    health: HashMap<String, SourceHealth>,
    runs: BTreeMap<u64, PipelineRun>,
    next_id: u64,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn upsert_raw_item(
        &self,
        item: NewRawItem,
        now: DateTime<Utc>,
    ) -> Result<RawUpsert, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let key = normalized_key(&item.title, &item.url);
        let ext_key = item
            .external_id
            .as_ref()
            .map(|e| (item.source_id.clone(), e.clone()));

        // Same url first, then (source, external id), then the normalized
        // key (catches url variants of one document).
        let existing = inner
            .raw_by_url
            .get(&item.url)
            .or_else(|| ext_key.as_ref().and_then(|k| inner.raw_by_ext.get(k)))
            .or_else(|| inner.raw_by_key.get(&key))
            .copied();

        if let Some(id) = existing {
            let row = inner.raw.get_mut(&id).expect("index points at live row");
            if row.content_hash == item.content_hash {
                row.fetched_at = now;
                return Ok(RawUpsert::Refreshed(id));
            }
            // Content update of the known document, not a new signal.
            row.source_id = item.source_id;
            row.item_kind = item.item_kind;
            row.external_id = item.external_id;
            row.title = item.title;
            row.content = item.content;
            row.published_at = item.published_at;
            row.content_hash = item.content_hash;
            row.meta = item.meta;
            row.fetched_at = now;
            let new_key = normalized_key(&row.title, &row.url);
            inner.raw_by_key.insert(new_key, id);
            if let Some(k) = ext_key {
                inner.raw_by_ext.insert(k, id);
            }
            return Ok(RawUpsert::Updated(id));
        }

        let id = inner.next_id();
        let row = RawItem {
            id,
            source_id: item.source_id,
            item_kind: item.item_kind,
            external_id: item.external_id,
            url: item.url.clone(),
            title: item.title,
            content: item.content,
            published_at: item.published_at,
            fetched_at: now,
            content_hash: item.content_hash,
            meta: item.meta,
        };
        inner.raw_by_url.insert(item.url, id);
        if let Some(k) = ext_key {
            inner.raw_by_ext.insert(k, id);
        }
        inner.raw_by_key.insert(key, id);
        inner.raw.insert(id, row);
        Ok(RawUpsert::Inserted(id))
    }

    fn upsert_normalized(&self, mut item: NormalizedItem) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if !inner.raw.contains_key(&item.raw_id) {
            return Err(StoreError::MissingParent(item.raw_id));
        }
        if let Some(&id) = inner.norm_by_raw.get(&item.raw_id) {
            item.id = id;
            inner.normalized.insert(id, item);
            return Ok(id);
        }
        let id = inner.next_id();
        item.id = id;
        inner.norm_by_raw.insert(item.raw_id, id);
        inner.normalized.insert(id, item);
        Ok(id)
    }

    fn upsert_score(&self, score: ScoreRow) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if !inner.normalized.contains_key(&score.item_id) {
            return Err(StoreError::MissingParent(score.item_id));
        }
        inner.scores.insert(score.item_id, score);
        Ok(())
    }

    fn upsert_event(&self, mut event: EventRecord) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if let Some(&id) = inner.event_by_url.get(&event.url) {
            event.id = id;
            inner.events.insert(id, event);
            return Ok(id);
        }
        let id = inner.next_id();
        event.id = id;
        inner.event_by_url.insert(event.url.clone(), id);
        inner.events.insert(id, event);
        Ok(id)
    }

    fn health_snapshot(&self) -> HashMap<String, SourceHealth> {
        self.inner.lock().expect("store mutex poisoned").health.clone()
    }

    fn flush_health(&self, snapshot: HashMap<String, SourceHealth>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        for (k, v) in snapshot {
            inner.health.insert(k, v);
        }
        Ok(())
    }

    fn begin_run(&self, trigger: TriggerOrigin, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        if inner.runs.values().any(|r| r.status == RunStatus::Running) {
            return Err(StoreError::RunInProgress);
        }
        let id = inner.next_id();
        inner.runs.insert(
            id,
            PipelineRun {
                id,
                status: RunStatus::Running,
                trigger,
                started_at: now,
                finished_at: None,
                duration_ms: None,
                summary: None,
                error_message: None,
            },
        );
        Ok(id)
    }

    fn finish_run(
        &self,
        run_id: u64,
        status: RunStatus,
        summary: Option<RunSummary>,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store mutex poisoned");
        let Some(run) = inner.runs.get_mut(&run_id) else {
            return Err(StoreError::Backend(format!("unknown run {run_id}")));
        };
        // Terminal states stay terminal.
        if run.status != RunStatus::Running {
            return Ok(());
        }
        run.status = status;
        run.finished_at = Some(now);
        run.duration_ms = Some((now - run.started_at).num_milliseconds().max(0) as u64);
        run.summary = summary;
        run.error_message = error_message;
        Ok(())
    }

    fn get_raw_by_url(&self, url: &str) -> Option<RawItem> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.raw_by_url.get(url).and_then(|id| inner.raw.get(id)).cloned()
    }

    fn normalized_for_raw(&self, raw_id: u64) -> Option<NormalizedItem> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner
            .norm_by_raw
            .get(&raw_id)
            .and_then(|id| inner.normalized.get(id))
            .cloned()
    }

    fn score_for_item(&self, item_id: u64) -> Option<ScoreRow> {
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .scores
            .get(&item_id)
            .cloned()
    }

    fn last_run(&self) -> Option<PipelineRun> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        inner.runs.values().next_back().cloned()
    }

    fn top_insights(&self, limit: usize) -> Vec<FeedEntry> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut entries: Vec<FeedEntry> = inner
            .normalized
            .values()
            .filter_map(|n| {
                let score = inner.scores.get(&n.id)?;
                let raw = inner.raw.get(&n.raw_id)?;
                Some(FeedEntry {
                    title: n.title.clone(),
                    url: raw.url.clone(),
                    summary: n.summary.clone(),
                    why_it_matters: n.why_it_matters.clone(),
                    category: n.category,
                    content_type: n.content_type,
                    tags: n.tags.clone(),
                    final_score: score.final_score,
                    scoring_reason: score.scoring_reason.clone(),
                })
            })
            .collect();
        entries.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        entries.truncate(limit);
        entries
    }

    fn top_events(&self, region: Option<crate::model::Region>, limit: usize) -> Vec<EventRecord> {
        let inner = self.inner.lock().expect("store mutex poisoned");
        let mut events: Vec<EventRecord> = inner
            .events
            .values()
            .filter(|e| region.map(|r| e.region == r).unwrap_or(true))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.score.total_cmp(&a.score));
        events.truncate(limit);
        events
    }

    fn counts(&self) -> StoreCounts {
        let inner = self.inner.lock().expect("store mutex poisoned");
        StoreCounts {
            raw_items: inner.raw.len(),
            normalized_items: inner.normalized.len(),
            scores: inner.scores.len(),
            events: inner.events.len(),
            runs: inner.runs.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::content_hash;
    use crate::model::{Category, ContentType, ItemKind, Region};

    fn new_raw(url: &str, title: &str, content: &str) -> NewRawItem {
        NewRawItem {
            source_id: "src".into(),
            item_kind: ItemKind::Post,
            external_id: None,
            url: url.into(),
            title: title.into(),
            content: content.into(),
            published_at: Some(Utc::now()),
            content_hash: content_hash(title, content),
            meta: BTreeMap::new(),
        }
    }

    fn normalized(raw_id: u64) -> NormalizedItem {
        NormalizedItem {
            id: 0,
            raw_id,
            title: "t".into(),
            summary: "s".into(),
            why_it_matters: "w".into(),
            category: Category::AiTech,
            content_type: ContentType::Post,
            tags: vec![],
            entities: vec![],
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn url_is_unique_reingest_updates() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = store
            .upsert_raw_item(new_raw("https://a.test/x", "Title", "v1"), now)
            .unwrap();
        assert!(matches!(a, RawUpsert::Inserted(_)));

        // same url, same hash: refresh only
        let b = store
            .upsert_raw_item(new_raw("https://a.test/x", "Title", "v1"), now)
            .unwrap();
        assert!(matches!(b, RawUpsert::Refreshed(_)));
        assert_eq!(a.id(), b.id());

        // same url, new content: in-place update, still one row
        let c = store
            .upsert_raw_item(new_raw("https://a.test/x", "Title", "v2"), now)
            .unwrap();
        assert!(matches!(c, RawUpsert::Updated(_)));
        assert_eq!(a.id(), c.id());
        assert_eq!(store.counts().raw_items, 1);
        assert_eq!(store.get_raw_by_url("https://a.test/x").unwrap().content, "v2");
    }

    #[test]
    fn external_id_pins_identity_across_url_changes() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut a = new_raw("https://a.test/item?id=1", "Original headline", "v1");
        a.external_id = Some("ext-1".into());
        let first = store.upsert_raw_item(a, now).unwrap();

        // Same (source, external id) comes back under a new url and title.
        let mut b = new_raw("https://a.test/item/permalink", "Edited headline", "v2");
        b.external_id = Some("ext-1".into());
        let second = store.upsert_raw_item(b, now).unwrap();

        assert!(matches!(second, RawUpsert::Updated(_)));
        assert_eq!(first.id(), second.id());
        assert_eq!(store.counts().raw_items, 1);
    }

    #[test]
    fn url_variant_with_same_key_updates_existing() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let a = store
            .upsert_raw_item(new_raw("https://a.test/x", "Title", "v1"), now)
            .unwrap();
        let b = store
            .upsert_raw_item(new_raw("https://a.test/x?utm_source=rss", "Title", "v2"), now)
            .unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(store.counts().raw_items, 1);
    }

    #[test]
    fn normalized_and_score_are_one_to_one() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let raw_id = store
            .upsert_raw_item(new_raw("https://a.test/x", "Title", "v1"), now)
            .unwrap()
            .id();

        let n1 = store.upsert_normalized(normalized(raw_id)).unwrap();
        let n2 = store.upsert_normalized(normalized(raw_id)).unwrap();
        assert_eq!(n1, n2);
        assert_eq!(store.counts().normalized_items, 1);

        store
            .upsert_score(ScoreRow {
                item_id: n1,
                freshness_score: 7.0,
                authority_score: 8.0,
                signal_score: 5.0,
                diversity_penalty: 0.0,
                final_score: 6.5,
                scoring_reason: "r".into(),
            })
            .unwrap();
        store
            .upsert_score(ScoreRow {
                item_id: n1,
                freshness_score: 7.0,
                authority_score: 8.0,
                signal_score: 5.0,
                diversity_penalty: 0.0,
                final_score: 6.6,
                scoring_reason: "r2".into(),
            })
            .unwrap();
        assert_eq!(store.counts().scores, 1);
        assert_eq!(store.score_for_item(n1).unwrap().final_score, 6.6);
    }

    #[test]
    fn orphan_writes_are_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.upsert_normalized(normalized(999)),
            Err(StoreError::MissingParent(999))
        ));
        assert!(store
            .upsert_score(ScoreRow {
                item_id: 999,
                freshness_score: 0.0,
                authority_score: 0.0,
                signal_score: 0.0,
                diversity_penalty: 0.0,
                final_score: 0.0,
                scoring_reason: String::new(),
            })
            .is_err());
    }

    #[test]
    fn event_url_unique() {
        let store = MemoryStore::new();
        let ev = EventRecord {
            id: 0,
            title: "Forum".into(),
            description: "d".into(),
            location: None,
            start_at: Some(Utc::now()),
            end_at: None,
            url: "https://ev.test/1".into(),
            organizer: None,
            source_domain: "ev.test".into(),
            region: Region::Taiwan,
            tags: vec![],
            score: 5.0,
        };
        let a = store.upsert_event(ev.clone()).unwrap();
        let b = store.upsert_event(ev).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.counts().events, 1);
    }

    #[test]
    fn overlapping_runs_refused_terminal_stays_terminal() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let id = store.begin_run(TriggerOrigin::Manual, now).unwrap();
        assert!(matches!(
            store.begin_run(TriggerOrigin::Scheduler, now),
            Err(StoreError::RunInProgress)
        ));
        store
            .finish_run(id, RunStatus::Failed, None, Some("boom".into()), now)
            .unwrap();
        // a second finish is ignored
        store
            .finish_run(id, RunStatus::Success, None, None, now)
            .unwrap();
        let run = store.last_run().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("boom"));
        // and a new run may start
        assert!(store.begin_run(TriggerOrigin::Manual, now).is_ok());
    }

    #[test]
    fn feed_joins_and_sorts_by_final_score() {
        let store = MemoryStore::new();
        let now = Utc::now();
        for (i, score) in [(1, 4.0f32), (2, 9.0), (3, 6.0)] {
            let raw_id = store
                .upsert_raw_item(
                    new_raw(&format!("https://a.test/{i}"), &format!("Item {i}"), "c"),
                    now,
                )
                .unwrap()
                .id();
            let n = store.upsert_normalized(normalized(raw_id)).unwrap();
            store
                .upsert_score(ScoreRow {
                    item_id: n,
                    freshness_score: 5.0,
                    authority_score: 5.0,
                    signal_score: 5.0,
                    diversity_penalty: 0.0,
                    final_score: score,
                    scoring_reason: "r".into(),
                })
                .unwrap();
        }
        let feed = store.top_insights(2);
        assert_eq!(feed.len(), 2);
        assert_eq!(feed[0].final_score, 9.0);
        assert_eq!(feed[1].final_score, 6.0);
    }
}
