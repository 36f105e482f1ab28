//! # Scorer
//! Explainable scoring: freshness, authority, signal and a diversity
//! penalty combine into a deterministic final score on a 0–10 scale. All
//! four components plus a human-readable reason are persisted.
//!
//! The exact curves are deliberately configuration, not constants: weights
//! and the penalty step/cap load from `config/score_weights.json` and fall
//! back to built-in defaults.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::looks_like_event;
use crate::model::ItemKind;
use crate::window::Windows;

/// Weighted-combination parameters. JSON shape:
/// `{"w_freshness":0.35,"w_authority":0.25,"w_signal":0.40,
///   "penalty_step":0.4,"penalty_cap":1.2}`
///
/// The default cap stays below the final-score spread of a large authority
/// gap, so a dominant source gets damped without ever outranking trust.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub w_freshness: f32,
    pub w_authority: f32,
    pub w_signal: f32,
    /// Penalty added per extra same-domain item.
    pub penalty_step: f32,
    /// Penalty ceiling; a dominant source is damped, never starved.
    pub penalty_cap: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            w_freshness: 0.35,
            w_authority: 0.25,
            w_signal: 0.40,
            penalty_step: 0.4,
            penalty_cap: 1.2,
        }
    }
}

impl ScoreWeights {
    /// Load from a JSON file, falling back to defaults on any error.
    pub fn load_from_file(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

/// Salience keywords with multiplicative weights above 1.0.
const SIGNAL_KEYWORDS: &[(&str, f32)] = &[
    ("agent", 1.2),
    ("benchmark", 1.2),
    ("funding", 1.2),
    ("series a", 1.15),
    ("series b", 1.2),
    ("inference", 1.15),
    ("training", 1.1),
    ("open-source", 1.1),
    ("demo day", 1.2),
    ("創投", 1.1),
    ("加速器", 1.1),
    ("論文", 1.1),
];

const INSIGHT_KEYWORDS: &[&str] = &[
    "ai", "llm", "model", "agent", "paper", "benchmark", "open-source", "研究", "創業", "融資",
];

fn clamp10(x: f32) -> f32 {
    x.clamp(0.0, 10.0)
}

fn round2(x: f32) -> f32 {
    (x * 100.0).round() / 100.0
}

/// Freshness decays monotonically with distance from `now`, scaled by the
/// kind's window span. Undated items get a neutral 5.0 baseline.
pub fn freshness_score(
    kind: ItemKind,
    published_at: Option<DateTime<Utc>>,
    windows: &Windows,
    now: DateTime<Utc>,
) -> f32 {
    let Some(ts) = published_at else {
        return 5.0;
    };
    let delta_days = (now - ts).num_days().abs();
    let span = windows.for_kind(kind).span_days();
    round2(clamp10(10.0 * (1.0 - delta_days as f32 / span as f32)))
}

/// Source authority (0–100) mapped onto the 0–10 component scale.
pub fn authority_component(authority_score: f32) -> f32 {
    round2(clamp10(authority_score / 10.0))
}

/// Salience heuristic over title + snippet. Missing input degrades to the
/// conservative base instead of failing.
pub fn signal_score(title: &str, snippet: &str, is_event: bool) -> f32 {
    let base = if is_event { 4.0 } else { 3.5 };
    let text = format!("{} {}", title, snippet).to_lowercase();
    if text.trim().is_empty() {
        return base;
    }

    let mut bonus = 0.0;
    for (kw, weight) in SIGNAL_KEYWORDS {
        if text.contains(kw) {
            bonus += (weight - 1.0) * 10.0;
        }
    }
    if is_event && looks_like_event(&text) {
        bonus += 1.5;
    }
    if !is_event && INSIGHT_KEYWORDS.iter().any(|k| text.contains(k)) {
        bonus += 1.0;
    }
    // Summarizer tags, when present, feed through the same table upstream.
    round2(clamp10(base + bonus))
}

/// Tracks how often each source domain has been picked within one run and
/// hands out the capped, non-decreasing penalty. Also enforces the hard
/// per-domain item cap.
#[derive(Debug)]
pub struct DiversityTracker {
    picked_by_domain: HashMap<String, usize>,
    step: f32,
    cap: f32,
    domain_cap: usize,
}

impl DiversityTracker {
    pub fn new(weights: &ScoreWeights, domain_cap: usize) -> Self {
        Self {
            picked_by_domain: HashMap::new(),
            step: weights.penalty_step,
            cap: weights.penalty_cap,
            domain_cap: domain_cap.max(1),
        }
    }

    /// Penalty for the next item from `domain`, without recording it. The
    /// first two picks ride free; each one after that adds a step.
    pub fn penalty(&self, domain: &str) -> f32 {
        let current = self.picked_by_domain.get(domain).copied().unwrap_or(0);
        if current <= 1 {
            return 0.0;
        }
        round2((((current - 1) as f32) * self.step).min(self.cap))
    }

    /// Whether the domain has hit its hard per-run cap.
    pub fn at_cap(&self, domain: &str) -> bool {
        self.picked_by_domain.get(domain).copied().unwrap_or(0) >= self.domain_cap
    }

    pub fn record(&mut self, domain: &str) {
        *self.picked_by_domain.entry(domain.to_string()).or_insert(0) += 1;
    }
}

/// The deterministic weighted combination. Pure function of its inputs.
pub fn final_score(
    freshness: f32,
    authority: f32,
    signal: f32,
    penalty: f32,
    w: &ScoreWeights,
) -> f32 {
    round2(clamp10(
        freshness * w.w_freshness + authority * w.w_authority + signal * w.w_signal - penalty,
    ))
}

pub fn scoring_reason(freshness: f32, authority: f32, signal: f32, penalty: f32) -> String {
    format!(
        "freshness {freshness:.2}/10 + authority {authority:.2}/10 + signal {signal:.2}/10 - diversity penalty {penalty:.2}"
    )
}

/// Host part of a URL, lowercased. The diversity key.
pub fn domain_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}
