//! # Classifier
//! Assigns item kind, category and (for events) region. Classification never
//! fails the pipeline: ambiguous cases fall back to web / product_biz /
//! global instead of raising.

use crate::model::{Category, ItemKind, Region, Source, SourceBucket};

/// Keywords that mark an item as an event announcement. Mixed-language on
/// purpose; the sources are.
pub const EVENT_KEYWORDS: &[&str] = &[
    "demo day",
    "meetup",
    "pitch",
    "conference",
    "summit",
    "workshop",
    "seminar",
    "hackathon",
    "新創",
    "創業",
    "創投",
    "加速器",
    "年會",
    "論壇",
    "講座",
    "交流會",
    "工作坊",
    "黑客松",
    "徵件",
    "路演",
    "媒合",
    "活動",
    "報名",
    "研討會",
];

/// Keywords pulling an item toward ai_tech.
const AI_TECH_KEYWORDS: &[&str] = &[
    "llm",
    "model",
    "agent",
    "paper",
    "benchmark",
    "inference",
    "training",
    "open-source",
    "dataset",
    "gpu",
    "transformer",
    "研究",
    "論文",
    "模型",
];

/// Keywords pulling an item toward product_biz.
const PRODUCT_BIZ_KEYWORDS: &[&str] = &[
    "funding",
    "series a",
    "series b",
    "revenue",
    "launch",
    "pricing",
    "acquisition",
    "ipo",
    "startup",
    "market",
    "融資",
    "創業",
    "募資",
    "產品",
];

/// Domain/locale markers that place an event in Taiwan.
const TAIWAN_MARKERS: &[&str] = &[
    ".tw", "taiwan", "taipei", "台灣", "台北", "新竹", "台中", "高雄", "台南",
];

const PAPER_URL_MARKERS: &[&str] = &["arxiv.org", "/papers", "/abs/", "openreview.net"];

const POST_URL_MARKERS: &[&str] = &[
    "news.ycombinator.com",
    "reddit.com",
    "github.com",
    "facebook.com",
    "youtube.com",
    "x.com",
    "twitter.com",
    "tldr.tech",
];

/// Full classification of one candidate item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub kind: ItemKind,
    pub category: Category,
    pub region: Region,
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Item kind from the source-declared type plus URL heuristics. URL markers
/// can promote a generic web item to paper/post; event detection combines
/// the source bucket with title keywords.
pub fn classify_kind(title: &str, url: &str, source: &Source) -> ItemKind {
    let url_l = url.to_lowercase();
    let title_l = title.to_lowercase();

    if source.bucket == SourceBucket::Event || source.kind_hint == ItemKind::Event {
        return ItemKind::Event;
    }
    if contains_any(&title_l, EVENT_KEYWORDS) {
        return ItemKind::Event;
    }
    if contains_any(&url_l, PAPER_URL_MARKERS) {
        return ItemKind::Paper;
    }
    if contains_any(&url_l, POST_URL_MARKERS) {
        return ItemKind::Post;
    }
    source.kind_hint
}

/// Category via the keyword rule table: whichever side matches more wins;
/// ties and no-matches default to product_biz.
pub fn classify_category(title: &str, snippet: &str) -> Category {
    let text = format!("{} {}", title, snippet).to_lowercase();
    let ai_hits = AI_TECH_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
    let biz_hits = PRODUCT_BIZ_KEYWORDS
        .iter()
        .filter(|k| text.contains(*k))
        .count();
    if ai_hits > biz_hits {
        Category::AiTech
    } else {
        Category::ProductBiz
    }
}

/// Event region from the source hint, then domain/locale markers in the
/// title and URL. Ties break toward global.
pub fn classify_region(title: &str, url: &str, source: &Source) -> Region {
    if source.region_hint == Region::Taiwan {
        return Region::Taiwan;
    }
    let text = format!("{} {}", title, url).to_lowercase();
    if contains_any(&text, TAIWAN_MARKERS) {
        Region::Taiwan
    } else {
        Region::Global
    }
}

pub fn classify(title: &str, snippet: &str, url: &str, source: &Source) -> Classification {
    Classification {
        kind: classify_kind(title, url, source),
        category: classify_category(title, snippet),
        region: classify_region(title, url, source),
    }
}

/// Whether a title reads like an event announcement. Used by adapters that
/// see mixed listings.
pub fn looks_like_event(title: &str) -> bool {
    contains_any(&title.to_lowercase(), EVENT_KEYWORDS)
}
