//! # Pipeline Runner
//! Orchestrates one logical unit of work: source selection → bounded
//! parallel fetch → dedup → classify → window filter → (optional
//! summarization) → score → persistence.
//!
//! Everything a stage persisted stays persisted even when a later stage
//! fails; the failure cause lands on the run row and the alert sink is
//! notified either way. Overlapping runs are refused by the store's
//! overlap guard. A shutdown signal aborts the in-flight run and records
//! it as failed with an explicit cause; there is no silent partial commit
//! without a terminal status.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use crate::classify;
use crate::config::PipelineConfig;
use crate::dedup::{content_hash, RunDedup};
use crate::error::PipelineError;
use crate::ingest::adapters::{self, FetchedItem};
use crate::ingest::fetcher::Fetcher;
use crate::ingest::{clean_text_field, sanitize_title_and_summary};
use crate::model::{
    EventRecord, ItemKind, NormalizedItem, RunStatus, RunSummary, ScoreRow, Source, TriggerOrigin,
    WindowOverrides,
};
use crate::notify::{RunAlert, WebhookAlertSink};
use crate::score::{
    authority_component, domain_of, final_score, freshness_score, scoring_reason, signal_score,
    DiversityTracker, ScoreWeights,
};
use crate::sources::SourceRegistry;
use crate::store::{NewRawItem, Store};
use crate::summarize::{ItemSummary, SummarizeOutcome, Summarizer};
use crate::window::Windows;

const FALLBACK_WHY: &str = "Relevant to AI strategy, technology or business decisions; worth tracking.";

/// Long-lived collaborators shared across runs. The per-run state lives in
/// [`PipelineContext`].
#[derive(Clone)]
pub struct PipelineDeps {
    pub cfg: Arc<PipelineConfig>,
    pub store: Arc<dyn Store>,
    pub fetcher: Arc<Fetcher>,
    pub summarizer: Arc<dyn Summarizer>,
    pub alerts: Arc<WebhookAlertSink>,
    pub registry: Arc<SourceRegistry>,
    pub shutdown: watch::Receiver<bool>,
}

/// Per-run state, created at run start and torn down (health flushed) at
/// run end. Passed explicitly through every stage; no ambient singletons.
struct PipelineContext {
    run_id: u64,
    now: DateTime<Utc>,
    windows: Windows,
    weights: ScoreWeights,
    sources: Vec<Source>,
    summary: RunSummary,
}

/// One fetched-and-parsed item waiting for dedup/classification.
struct Candidate {
    source: Source,
    item: FetchedItem,
    stale: bool,
}

/// An in-window insight headed for normalize + score.
struct InsightWork {
    raw_id: u64,
    source: Source,
    item: FetchedItem,
    kind: ItemKind,
    category: crate::model::Category,
    summary: Option<ItemSummary>,
}

/// Trigger operation: run the pipeline now, with optional window overrides.
pub async fn run_pipeline(
    deps: &PipelineDeps,
    overrides: WindowOverrides,
    trigger: TriggerOrigin,
) -> Result<RunSummary, PipelineError> {
    crate::ingest::ensure_metrics_described();

    let started = Instant::now();
    let now = Utc::now();
    let run_id = deps.store.begin_run(trigger, now)?;
    tracing::info!(run_id, trigger = trigger.as_str(), "pipeline run started");

    // Watchdog: alert (and nothing else) if the run outlives its soft
    // timeout.
    let watchdog = {
        let alerts = Arc::clone(&deps.alerts);
        let soft = deps.cfg.soft_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(soft).await;
            alerts.notify_soft_timeout(run_id, soft.as_secs()).await;
        })
    };

    let result = execute_stages(deps, run_id, now, overrides).await;
    watchdog.abort();

    // Tear-down: flush health counters gathered during the run.
    if let Err(e) = deps
        .store
        .flush_health(deps.fetcher.health().snapshot())
    {
        tracing::warn!(error = %e, "health flush failed");
    }

    let duration_ms = started.elapsed().as_millis() as u64;
    histogram!("pipeline_run_duration_ms").record(duration_ms as f64);
    gauge!("pipeline_last_run_ts").set(Utc::now().timestamp() as f64);

    match result {
        Ok(mut summary) => {
            summary.duration_ms = duration_ms;
            counter!("pipeline_runs_total", "outcome" => "success").increment(1);
            deps.store
                .finish_run(run_id, RunStatus::Success, Some(summary.clone()), None, Utc::now())
                .map_err(PipelineError::from)?;
            deps.alerts
                .notify_run(&RunAlert {
                    run_id,
                    status: RunStatus::Success,
                    trigger,
                    duration_ms,
                    summary: Some(summary.clone()),
                    error: None,
                })
                .await;
            tracing::info!(run_id, ?summary, "pipeline run finished");
            Ok(summary)
        }
        Err(err) => {
            counter!("pipeline_runs_total", "outcome" => "failed").increment(1);
            if let Err(e) = deps.store.finish_run(
                run_id,
                RunStatus::Failed,
                None,
                Some(err.to_string()),
                Utc::now(),
            ) {
                tracing::error!(error = %e, run_id, "failed to record run failure");
            }
            deps.alerts
                .notify_run(&RunAlert {
                    run_id,
                    status: RunStatus::Failed,
                    trigger,
                    duration_ms,
                    summary: None,
                    error: Some(err.to_string()),
                })
                .await;
            tracing::error!(run_id, error = %err, "pipeline run failed");
            Err(err)
        }
    }
}

async fn execute_stages(
    deps: &PipelineDeps,
    run_id: u64,
    now: DateTime<Utc>,
    overrides: WindowOverrides,
) -> Result<RunSummary, PipelineError> {
    let cfg = &deps.cfg;
    let mut ctx = PipelineContext {
        run_id,
        now,
        windows: Windows::resolve(&cfg.windows, &overrides),
        weights: ScoreWeights::load_from_file(&cfg.score_weights_path),
        sources: deps.registry.resolve(),
        summary: RunSummary::default(),
    };
    ctx.summary.sources_selected = ctx.sources.len();

    // Soft circuit breaker: deprioritized sources sit out while cooling.
    let health = deps.fetcher.health();
    let before = ctx.sources.len();
    ctx.sources.retain(|s| {
        let cooling = health.is_cooling(
            &s.id,
            cfg.unhealthy_threshold,
            cfg.unhealthy_cooloff_minutes,
            now,
        );
        if cooling {
            tracing::info!(source = %s.id, "skipping unhealthy source for this run");
        }
        !cooling
    });
    ctx.summary.sources_skipped_unhealthy = before - ctx.sources.len();

    let candidates = fetch_stage(deps, &mut ctx).await?;
    ensure_not_cancelled(deps)?;

    let (events, insights) = ingest_stage(deps, &mut ctx, candidates)?;
    ensure_not_cancelled(deps)?;

    score_events(deps, &mut ctx, events)?;

    let insights = summarize_stage(deps, &ctx, insights).await;
    ensure_not_cancelled(deps)?;

    score_insights(deps, &mut ctx, insights)?;

    Ok(ctx.summary)
}

fn ensure_not_cancelled(deps: &PipelineDeps) -> Result<(), PipelineError> {
    if *deps.shutdown.borrow() {
        return Err(PipelineError::Cancelled("shutdown signal received".into()));
    }
    Ok(())
}

/// The only parallel stage: a bounded worker pool fetches sources
/// concurrently. The registry already de-duplicated URLs, so there is at
/// most one in-flight fetch per URL per run.
async fn fetch_stage(
    deps: &PipelineDeps,
    ctx: &mut PipelineContext,
) -> Result<Vec<Candidate>, PipelineError> {
    let semaphore = Arc::new(Semaphore::new(deps.cfg.fetch_concurrency));
    let mut set = JoinSet::new();

    for source in ctx.sources.iter().cloned() {
        let semaphore = Arc::clone(&semaphore);
        let fetcher = Arc::clone(&deps.fetcher);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome = fetcher.fetch(&source.url, &source.id).await;
            (source, outcome)
        });
    }

    let mut candidates = Vec::new();
    let mut shutdown = deps.shutdown.clone();
    let mut shutdown_closed = false;

    loop {
        tokio::select! {
            joined = set.join_next() => {
                let Some(joined) = joined else { break };
                let Ok((source, outcome)) = joined else {
                    // A panicked fetch task loses one source, not the run.
                    ctx.summary.sources_failed += 1;
                    continue;
                };
                match outcome {
                    Ok(fetch) => {
                        ctx.summary.sources_fetched += 1;
                        match adapters::parse(source.adapter, &source.name, &source.url, &fetch.body) {
                            Ok(items) => {
                                counter!("ingest_items_total").increment(items.len() as u64);
                                if fetch.stale {
                                    ctx.summary.stale_served += items.len();
                                }
                                for item in items {
                                    candidates.push(Candidate {
                                        source: source.clone(),
                                        item,
                                        stale: fetch.stale,
                                    });
                                }
                            }
                            Err(e) => {
                                counter!("ingest_parse_errors_total").increment(1);
                                tracing::warn!(source = %source.id, error = %e, "parse failed, skipping source body");
                            }
                        }
                    }
                    Err(e) => {
                        ctx.summary.sources_failed += 1;
                        tracing::warn!(source = %source.id, error = %e, "source dropped for this run");
                    }
                }
            }
            changed = shutdown.changed(), if !shutdown_closed => {
                match changed {
                    Ok(()) if *shutdown.borrow() => {
                        set.abort_all();
                        return Err(PipelineError::Cancelled("shutdown signal received".into()));
                    }
                    Ok(()) => {}
                    Err(_) => shutdown_closed = true,
                }
            }
        }
    }

    ctx.summary.items_fetched = candidates.len();
    tracing::info!(
        run_id = ctx.run_id,
        items = candidates.len(),
        sources_ok = ctx.summary.sources_fetched,
        sources_failed = ctx.summary.sources_failed,
        "fetch stage complete"
    );
    Ok(candidates)
}

/// Dedup, classify, persist raw rows, apply the window filter. Out-of-window
/// items keep their raw row for future reprocessing but go no further.
fn ingest_stage(
    deps: &PipelineDeps,
    ctx: &mut PipelineContext,
    candidates: Vec<Candidate>,
) -> Result<(Vec<InsightWork>, Vec<InsightWork>), PipelineError> {
    let mut dedup = RunDedup::new();
    let mut events = Vec::new();
    let mut insights = Vec::new();

    for candidate in candidates {
        let Candidate { source, item, stale } = candidate;

        if !dedup.first_sighting(&item.title, &item.url) {
            ctx.summary.duplicates_skipped += 1;
            counter!("ingest_dedup_total").increment(1);
            continue;
        }

        let cls = classify::classify(&item.title, &item.content, &item.url, &source);

        let mut meta = BTreeMap::new();
        meta.insert("source_name".to_string(), source.name.clone());
        if stale {
            meta.insert("stale".to_string(), "true".to_string());
        }

        let upsert = deps.store.upsert_raw_item(
            NewRawItem {
                source_id: source.id.clone(),
                item_kind: cls.kind,
                external_id: item.external_id.clone(),
                url: item.url.clone(),
                title: item.title.clone(),
                content: item.content.clone(),
                published_at: item.published_at,
                content_hash: content_hash(&item.title, &item.content),
                meta,
            },
            ctx.now,
        )?;

        // A Refreshed/Updated upsert is a known document, not a new signal;
        // it still flows on so its score is recomputed for this run.
        if !ctx.windows.contains(cls.kind, item.published_at, ctx.now) {
            ctx.summary.out_of_window += 1;
            counter!("ingest_out_of_window_total").increment(1);
            continue;
        }

        let work = InsightWork {
            raw_id: upsert.id(),
            source,
            item,
            kind: cls.kind,
            category: cls.category,
            summary: None,
        };
        if cls.kind == ItemKind::Event {
            events.push(work);
        } else {
            insights.push(work);
        }
    }

    Ok((events, insights))
}

/// Deterministic pre-score ordering: salience first, then authority and
/// freshness, URL as the stable tie-break.
fn rank_key(ctx: &PipelineContext, w: &InsightWork) -> (f32, f32, f32) {
    (
        signal_score(&w.item.title, &w.item.content, w.kind == ItemKind::Event),
        authority_component(w.source.authority_score),
        freshness_score(w.kind, w.item.published_at, &ctx.windows, ctx.now),
    )
}

fn sort_for_scoring(ctx: &PipelineContext, work: &mut [InsightWork]) {
    work.sort_by(|a, b| {
        let (asig, aauth, afresh) = rank_key(ctx, a);
        let (bsig, bauth, bfresh) = rank_key(ctx, b);
        bsig.total_cmp(&asig)
            .then(bauth.total_cmp(&aauth))
            .then(bfresh.total_cmp(&afresh))
            .then(a.item.url.cmp(&b.item.url))
    });
}

fn score_events(
    deps: &PipelineDeps,
    ctx: &mut PipelineContext,
    mut events: Vec<InsightWork>,
) -> Result<(), PipelineError> {
    sort_for_scoring(ctx, &mut events);
    let mut diversity = DiversityTracker::new(&ctx.weights, deps.cfg.source_cap_events);

    for work in events {
        let domain = domain_of(&work.item.url);
        if diversity.at_cap(&domain) {
            ctx.summary.domain_capped += 1;
            continue;
        }

        let freshness = freshness_score(ItemKind::Event, work.item.published_at, &ctx.windows, ctx.now);
        let authority = authority_component(work.source.authority_score);
        let signal = signal_score(&work.item.title, &work.item.content, true);
        let penalty = diversity.penalty(&domain);
        let final_s = final_score(freshness, authority, signal, penalty, &ctx.weights);

        let (title, description) = sanitize_title_and_summary(&work.item.title, &work.item.content);
        let region = classify::classify_region(&work.item.title, &work.item.url, &work.source);

        deps.store.upsert_event(EventRecord {
            id: 0,
            title,
            description,
            location: None,
            start_at: work.item.published_at,
            end_at: None,
            url: work.item.url.clone(),
            organizer: Some(work.source.name.clone()),
            source_domain: domain.clone(),
            region,
            tags: vec!["AI".to_string(), "event".to_string()],
            score: final_s,
        })?;

        diversity.record(&domain);
        ctx.summary.events_scored += 1;
        counter!("scored_items_total").increment(1);
    }
    Ok(())
}

/// Summarization boundary: bounded concurrent calls with typed outcomes.
/// Degraded or disabled summaries leave `summary` empty; scoring proceeds
/// on heuristics alone.
async fn summarize_stage(
    deps: &PipelineDeps,
    ctx: &PipelineContext,
    insights: Vec<InsightWork>,
) -> Vec<InsightWork> {
    let semaphore = Arc::new(Semaphore::new(deps.cfg.summarize_concurrency));
    let mut set = JoinSet::new();

    for (idx, work) in insights.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let summarizer = Arc::clone(&deps.summarizer);
        set.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome = summarizer.summarize(&work.item.title, &work.item.content).await;
            (idx, work, outcome)
        });
    }

    let mut out: Vec<(usize, InsightWork)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        let Ok((idx, mut work, outcome)) = joined else {
            continue;
        };
        match outcome {
            SummarizeOutcome::Summary(s) => work.summary = Some(s),
            SummarizeOutcome::Degraded(why) => {
                tracing::debug!(run_id = ctx.run_id, url = %work.item.url, why, "summary degraded");
            }
            SummarizeOutcome::Disabled => {}
        }
        out.push((idx, work));
    }

    // Restore deterministic order regardless of completion order.
    out.sort_by_key(|(idx, _)| *idx);
    out.into_iter().map(|(_, w)| w).collect()
}

fn score_insights(
    deps: &PipelineDeps,
    ctx: &mut PipelineContext,
    mut insights: Vec<InsightWork>,
) -> Result<(), PipelineError> {
    sort_for_scoring(ctx, &mut insights);
    let mut diversity = DiversityTracker::new(&ctx.weights, deps.cfg.source_cap_insights);

    for work in insights {
        let domain = domain_of(&work.item.url);
        if diversity.at_cap(&domain) {
            ctx.summary.domain_capped += 1;
            continue;
        }

        let freshness = freshness_score(work.kind, work.item.published_at, &ctx.windows, ctx.now);
        let authority = authority_component(work.source.authority_score);
        let signal = signal_score(&work.item.title, &work.item.content, false);
        let penalty = diversity.penalty(&domain);
        let final_s = final_score(freshness, authority, signal, penalty, &ctx.weights);

        let (summary_text, why, category, tags) = match &work.summary {
            Some(s) => (
                s.summary.clone(),
                if s.why_it_matters.is_empty() {
                    FALLBACK_WHY.to_string()
                } else {
                    s.why_it_matters.clone()
                },
                s.category.unwrap_or(work.category),
                if s.tags.is_empty() {
                    vec!["AI".to_string()]
                } else {
                    s.tags.clone()
                },
            ),
            None => {
                let snippet = clean_text_field(&work.item.content, 180);
                let snippet = if snippet.is_empty() {
                    clean_text_field(&work.item.title, 180)
                } else {
                    snippet
                };
                (snippet, FALLBACK_WHY.to_string(), work.category, vec!["AI".to_string()])
            }
        };

        let (title, summary_text) = sanitize_title_and_summary(&work.item.title, &summary_text);

        let item_id = deps.store.upsert_normalized(NormalizedItem {
            id: 0,
            raw_id: work.raw_id,
            title,
            summary: summary_text,
            why_it_matters: clean_text_field(&why, 500),
            category,
            content_type: work.kind.into(),
            tags,
            entities: Vec::new(),
            updated_at: ctx.now,
        })?;

        deps.store.upsert_score(ScoreRow {
            item_id,
            freshness_score: freshness,
            authority_score: authority,
            signal_score: signal,
            diversity_penalty: penalty,
            final_score: final_s,
            scoring_reason: scoring_reason(freshness, authority, signal, penalty),
        })?;

        diversity.record(&domain);
        ctx.summary.insights_scored += 1;
        counter!("scored_items_total").increment(1);
    }
    Ok(())
}
