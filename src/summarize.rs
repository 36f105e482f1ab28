//! Optional language-generation collaborator. Given title + content it
//! returns short summary / why-it-matters text and a category hint. Calls
//! are bounded by an explicit timeout and return a typed outcome; a missing
//! or failing service degrades to "no summary" without blocking scoring.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use serde_json::json;

use crate::model::Category;

/// What a summarize call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SummarizeOutcome {
    /// Service answered with usable text.
    Summary(ItemSummary),
    /// Service failed or timed out; carry the cause for logging.
    Degraded(String),
    /// No service configured.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ItemSummary {
    pub summary: String,
    #[serde(default)]
    pub why_it_matters: String,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, content: &str) -> SummarizeOutcome;
    fn name(&self) -> &'static str;
}

/// No service configured; every call is `Disabled`.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _title: &str, _content: &str) -> SummarizeOutcome {
        SummarizeOutcome::Disabled
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Chat-completions-style HTTP service. The prompt asks for strict JSON and
/// anything else is treated as degradation, not an error for the pipeline.
pub struct HttpSummarizer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpSummarizer {
    pub fn new(endpoint: String, api_key: String, model: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("insight-pulse/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint,
            api_key,
            model,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}
#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Some providers wrap JSON in code fences; strip them before parsing.
fn strip_fences(s: &str) -> &str {
    s.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[async_trait]
impl Summarizer for HttpSummarizer {
    async fn summarize(&self, title: &str, content: &str) -> SummarizeOutcome {
        let prompt = format!(
            "Summarize the item below for a technology/startup digest. Reply with strict JSON: \
             {{\"summary\": \"...\", \"why_it_matters\": \"...\", \"category\": \"ai_tech\"|\"product_biz\", \"tags\": [\"...\"]}}.\n\
             Title: {title}\nContent: {content}"
        );
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.2,
        });

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await;

        let degrade = |why: String| {
            counter!("summarize_degraded_total").increment(1);
            tracing::warn!(reason = %why, "summarizer degraded");
            SummarizeOutcome::Degraded(why)
        };

        let resp = match resp {
            Ok(r) => r,
            Err(e) => return degrade(format!("request failed: {e}")),
        };
        if !resp.status().is_success() {
            return degrade(format!("http status {}", resp.status().as_u16()));
        }
        let parsed: ChatResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => return degrade(format!("response decode failed: {e}")),
        };
        let Some(text) = parsed.choices.first().map(|c| c.message.content.as_str()) else {
            return degrade("empty choices".to_string());
        };
        match serde_json::from_str::<ItemSummary>(strip_fences(text)) {
            Ok(summary) => SummarizeOutcome::Summary(summary),
            Err(e) => degrade(format!("payload not valid JSON: {e}")),
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Build from environment: `SUMMARIZER_API_KEY` enables the HTTP client,
/// `SUMMARIZER_ENDPOINT`/`SUMMARIZER_MODEL`/`SUMMARIZER_TIMEOUT_SECS` tune it.
pub fn build_summarizer() -> Arc<dyn Summarizer> {
    let Ok(api_key) = std::env::var("SUMMARIZER_API_KEY") else {
        return Arc::new(DisabledSummarizer);
    };
    if api_key.trim().is_empty() {
        return Arc::new(DisabledSummarizer);
    }
    let endpoint = std::env::var("SUMMARIZER_ENDPOINT")
        .unwrap_or_else(|_| "https://api.deepseek.com/chat/completions".to_string());
    let model = std::env::var("SUMMARIZER_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string());
    let timeout_secs: u64 = std::env::var("SUMMARIZER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(20);
    Arc::new(HttpSummarizer::new(
        endpoint,
        api_key,
        model,
        Duration::from_secs(timeout_secs),
    ))
}

/// Deterministic stand-in for tests and offline runs.
pub struct FixedSummarizer {
    pub outcome: SummarizeOutcome,
}

#[async_trait]
impl Summarizer for FixedSummarizer {
    async fn summarize(&self, _title: &str, _content: &str) -> SummarizeOutcome {
        self.outcome.clone()
    }
    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_summarizer_is_silent() {
        let s = DisabledSummarizer;
        assert_eq!(s.summarize("t", "c").await, SummarizeOutcome::Disabled);
    }

    #[tokio::test]
    async fn unreachable_endpoint_degrades() {
        let s = HttpSummarizer::new(
            "http://127.0.0.1:9/v1/chat".to_string(),
            "key".to_string(),
            "m".to_string(),
            Duration::from_millis(300),
        );
        match s.summarize("t", "c").await {
            SummarizeOutcome::Degraded(_) => {}
            other => panic!("expected degraded, got {other:?}"),
        }
    }

    #[test]
    fn fences_are_stripped() {
        let payload = "```json\n{\"summary\":\"s\"}\n```";
        let parsed: ItemSummary = serde_json::from_str(strip_fences(payload)).unwrap();
        assert_eq!(parsed.summary, "s");
    }

    #[test]
    fn item_summary_tolerates_missing_fields() {
        let parsed: ItemSummary = serde_json::from_str(r#"{"summary":"only"}"#).unwrap();
        assert!(parsed.why_it_matters.is_empty());
        assert!(parsed.category.is_none());
    }
}
