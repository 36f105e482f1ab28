//! Source adapters: one fetch+parse capability set per source type, selected
//! by the explicit [`AdapterKind`] tag. A closed set: adding a source type
//! means adding a variant here, not registering a trait object somewhere.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::error::ParseError;
use crate::ingest::normalize_text;
use crate::model::AdapterKind;

/// One parsed candidate before dedup/classification.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedItem {
    pub title: String,
    pub url: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
}

/// Parse a fetched body according to the source's adapter tag.
pub fn parse(
    adapter: AdapterKind,
    source_name: &str,
    base_url: &str,
    body: &str,
) -> std::result::Result<Vec<FetchedItem>, ParseError> {
    let parsed = match adapter {
        AdapterKind::Rss => parse_rss(body),
        AdapterKind::HtmlListing => Ok(parse_html_listing(base_url, body)),
        AdapterKind::JsonFeed => parse_json_feed(body),
    };
    parsed.map_err(|e| ParseError::new(source_name, format!("{e:#}")))
}

// ---- RSS ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}
#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC))
        .and_then(|dt| Utc.timestamp_opt(dt.unix_timestamp(), 0).single())
}

fn parse_rss(body: &str) -> Result<Vec<FetchedItem>> {
    let xml_clean = scrub_html_entities_for_xml(body);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let Some(link) = it.link.filter(|l| !l.trim().is_empty()) else {
            continue;
        };
        let title = normalize_text(it.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            continue;
        }
        out.push(FetchedItem {
            title,
            url: link.trim().to_string(),
            content: normalize_text(it.description.as_deref().unwrap_or_default()),
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            external_id: it.guid,
        });
    }
    Ok(out)
}

/// Entities RSS feeds love that the XML parser does not.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

// ---- HTML listing ----

/// Anchors lifted from a listing page. Noisy by nature; short link texts and
/// non-http targets are dropped, and the result is capped.
fn parse_html_listing(base_url: &str, body: &str) -> Vec<FetchedItem> {
    static RE_ANCHOR: OnceCell<Regex> = OnceCell::new();
    let re = RE_ANCHOR.get_or_init(|| {
        Regex::new(r#"(?is)<a[^>]+href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#).unwrap()
    });

    let mut out = Vec::new();
    for cap in re.captures_iter(body).take(400) {
        let href = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let text = normalize_text(cap.get(2).map(|m| m.as_str()).unwrap_or_default());
        if text.chars().count() < 8 {
            continue;
        }
        let Some(url) = join_url(base_url, href) else {
            continue;
        };
        out.push(FetchedItem {
            published_at: extract_date(&text),
            title: text,
            url,
            content: String::new(),
            external_id: None,
        });
        if out.len() >= 80 {
            break;
        }
    }
    out
}

/// Resolve an anchor href against the listing page origin. Path-relative
/// links (no leading slash) are dropped rather than guessed at.
fn join_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    if href.starts_with('/') {
        let (scheme, rest) = base.split_once("://")?;
        let host = rest.split(['/', '?']).next()?;
        return Some(format!("{scheme}://{host}{href}"));
    }
    None
}

/// Pull a date out of listing text: ISO-ish `2026-03-14`, Chinese
/// `2026年3月14日`, or month-day forms assumed near-future.
pub fn extract_date(text: &str) -> Option<DateTime<Utc>> {
    static RE_ISO: OnceCell<Regex> = OnceCell::new();
    static RE_ZH: OnceCell<Regex> = OnceCell::new();
    static RE_MD: OnceCell<Regex> = OnceCell::new();

    let re_iso = RE_ISO.get_or_init(|| Regex::new(r"(20\d{2})[./-](\d{1,2})[./-](\d{1,2})").unwrap());
    if let Some(c) = re_iso.captures(text) {
        return ymd_to_utc(parse_u32(&c[1]), parse_u32(&c[2]), parse_u32(&c[3]));
    }

    let re_zh = RE_ZH.get_or_init(|| Regex::new(r"(20\d{2})年(\d{1,2})月(\d{1,2})日").unwrap());
    if let Some(c) = re_zh.captures(text) {
        return ymd_to_utc(parse_u32(&c[1]), parse_u32(&c[2]), parse_u32(&c[3]));
    }

    let re_md = RE_MD.get_or_init(|| Regex::new(r"(\d{1,2})月(\d{1,2})日").unwrap());
    if let Some(c) = re_md.captures(text) {
        let now = Utc::now();
        let year = chrono::Datelike::year(&now) as u32;
        let candidate = ymd_to_utc(year, parse_u32(&c[1]), parse_u32(&c[2]))?;
        // A month-day more than a month behind us usually means next year.
        if candidate < now - chrono::Duration::days(30) {
            return ymd_to_utc(year + 1, parse_u32(&c[1]), parse_u32(&c[2]));
        }
        return Some(candidate);
    }

    None
}

fn parse_u32(s: &str) -> u32 {
    s.parse().unwrap_or(0)
}

/// Midday Taipei (04:00 UTC) so date-only items land on the right day in
/// either zone.
fn ymd_to_utc(y: u32, m: u32, d: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(y as i32, m, d, 4, 0, 0).single()
}

// ---- JSON feed (Algolia-style search API) ----

#[derive(Debug, Deserialize)]
struct JsonFeed {
    hits: Vec<JsonHit>,
}
#[derive(Debug, Deserialize)]
struct JsonHit {
    title: Option<String>,
    url: Option<String>,
    #[serde(rename = "objectID")]
    object_id: Option<String>,
    created_at: Option<String>,
    #[serde(default)]
    story_text: Option<String>,
}

fn parse_json_feed(body: &str) -> Result<Vec<FetchedItem>> {
    let feed: JsonFeed = serde_json::from_str(body).context("parsing json feed")?;
    let mut out = Vec::with_capacity(feed.hits.len());
    for hit in feed.hits {
        let title = normalize_text(hit.title.as_deref().unwrap_or_default());
        if title.is_empty() {
            continue;
        }
        let url = match (&hit.url, &hit.object_id) {
            (Some(u), _) if !u.trim().is_empty() => u.trim().to_string(),
            (_, Some(id)) => format!("https://news.ycombinator.com/item?id={id}"),
            _ => continue,
        };
        out.push(FetchedItem {
            title,
            url,
            content: normalize_text(hit.story_text.as_deref().unwrap_or_default()),
            published_at: hit
                .created_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            external_id: hit.object_id,
        });
    }
    Ok(out)
}
