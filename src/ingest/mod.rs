// src/ingest/mod.rs
pub mod adapters;
pub mod cache;
pub mod fetcher;
pub mod health;
pub mod proxy;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline invocations by outcome.");
        describe_counter!("fetch_attempts_total", "Individual fetch attempts.");
        describe_counter!("fetch_failures_total", "Fetches that exhausted retries.");
        describe_counter!(
            "fetch_stale_served_total",
            "Fetches answered from the stale cache."
        );
        describe_counter!("ingest_items_total", "Items parsed from source bodies.");
        describe_counter!("ingest_dedup_total", "Items removed as duplicates.");
        describe_counter!(
            "ingest_out_of_window_total",
            "Items excluded by the time-window filter."
        );
        describe_counter!("ingest_parse_errors_total", "Source bodies that failed to parse.");
        describe_counter!("scored_items_total", "Normalized items scored per run.");
        describe_counter!(
            "summarize_degraded_total",
            "Summarizer calls that fell back to defaults."
        );
        describe_histogram!("fetch_latency_ms", "Fetch latency in milliseconds.");
        describe_histogram!("pipeline_run_duration_ms", "Run duration in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last ran.");
    });
}

/// Normalize scraped text: decode entities, strip tags, straighten quotes,
/// collapse whitespace, drop trailing sentence punctuation, cap the length.
pub fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{0000}', " ")
        .replace("```", " ");

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    while let Some(last) = out.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',') {
            out.pop();
        } else {
            break;
        }
    }

    if out.chars().count() > 2000 {
        out = out.chars().take(2000).collect();
    }
    out
}

/// Replacement-character or double-encoded-UTF8 residue.
fn looks_mojibake(text: &str) -> bool {
    text.contains('\u{FFFD}') || text.contains("Ã") || (text.contains("â") && !text.contains('—'))
}

/// Clamp a cleaned text field to `max_len` characters, trimming dangling
/// punctuation at the cut.
pub fn clean_text_field(text: &str, max_len: usize) -> String {
    let value = normalize_text(text);
    if value.chars().count() <= max_len {
        return value;
    }
    let cut: String = value.chars().take(max_len).collect();
    cut.trim_end_matches([' ', ',', '.', ';', ':', '：', '，', '。'])
        .to_string()
}

/// Sanitize a title/summary pair before persistence: length caps, paragraph
/// titles split back into the summary, mojibake guarded with placeholders.
pub fn sanitize_title_and_summary(title: &str, summary: &str) -> (String, String) {
    let mut t = clean_text_field(title, 180);
    let mut s = clean_text_field(summary, 600);

    if t.chars().count() > 120 && (t.contains("。 ") || t.contains("###") || title.contains('\n')) {
        s = if s.is_empty() {
            t.clone()
        } else {
            clean_text_field(&format!("{} {}", t, s), 600)
        };
        t = clean_text_field(t.split('。').next().unwrap_or(&t), 90);
    }

    if looks_mojibake(&t) {
        t = String::new();
    }
    if looks_mojibake(&s) {
        s = clean_text_field(&s.replace('\u{FFFD}', " "), 600);
    }

    let t = if t.is_empty() { "Untitled item".to_string() } else { t };
    let s = if s.is_empty() { "No summary yet".to_string() } else { s };
    (t, s)
}
