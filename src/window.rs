//! # Time Window Filter
//! Per-kind lookback/lookahead windows, each independently overridable per
//! run. Items outside the resolved window are excluded from normalized/event
//! persistence for that run; their raw rows are retained for reprocessing.

use chrono::{DateTime, Duration, Utc};

use crate::config::WindowDefaults;
use crate::model::{ItemKind, WindowOverrides};

/// Resolved window for one kind: how far back and how far ahead counts as
/// in-window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindWindow {
    pub past_days: i64,
    pub future_days: i64,
}

impl KindWindow {
    /// Widest side of the window, floored at 1 day. Used by the freshness
    /// decay as the full-span denominator.
    pub fn span_days(&self) -> i64 {
        self.past_days.max(self.future_days).max(1)
    }
}

/// All four kind windows for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    paper: KindWindow,
    post: KindWindow,
    event: KindWindow,
    web: KindWindow,
}

impl Windows {
    /// Resolve from configured defaults plus optional per-run overrides.
    /// Overridden day counts are floored at 1.
    pub fn resolve(defaults: &WindowDefaults, overrides: &WindowOverrides) -> Self {
        let day = |v: Option<i64>, d: i64| v.map(|x| x.max(1)).unwrap_or(d);
        Self {
            paper: KindWindow {
                past_days: day(overrides.paper_days, defaults.paper_past_days),
                future_days: 0,
            },
            post: KindWindow {
                past_days: day(overrides.post_days, defaults.post_past_days),
                future_days: 0,
            },
            event: KindWindow {
                past_days: 0,
                future_days: day(overrides.event_days, defaults.event_future_days),
            },
            web: KindWindow {
                past_days: day(overrides.web_past_days, defaults.web_past_days),
                future_days: day(overrides.web_future_days, defaults.web_future_days),
            },
        }
    }

    pub fn for_kind(&self, kind: ItemKind) -> KindWindow {
        match kind {
            ItemKind::Paper => self.paper,
            ItemKind::Post => self.post,
            ItemKind::Event => self.event,
            ItemKind::Web => self.web,
        }
    }

    /// Whether a publication timestamp falls inside the kind's window.
    ///
    /// Undated items: events are strictly future-facing and need a date to
    /// qualify; other kinds pass through and get the neutral freshness
    /// baseline instead.
    pub fn contains(
        &self,
        kind: ItemKind,
        published_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        let w = self.for_kind(kind);
        let Some(ts) = published_at else {
            return kind != ItemKind::Event;
        };
        let earliest = now - Duration::days(w.past_days);
        let latest = now + Duration::days(w.future_days);
        ts >= earliest && ts <= latest
    }
}
