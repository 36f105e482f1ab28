//! Alert sink: a webhook notified with run id, duration and error (if any)
//! on every run completion, plus a soft-timeout ping from the watchdog.
//! Failures always notify; success pings are gated by configuration.

use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::model::{RunStatus, RunSummary, TriggerOrigin};

/// Payload assembled by the runner on completion.
#[derive(Debug, Clone)]
pub struct RunAlert {
    pub run_id: u64,
    pub status: RunStatus,
    pub trigger: TriggerOrigin,
    pub duration_ms: u64,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct WebhookAlertSink {
    webhook_url: Option<String>,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    notify_on_success: bool,
}

impl WebhookAlertSink {
    pub fn new(webhook_url: Option<String>, notify_on_success: bool) -> Self {
        Self {
            webhook_url,
            client: Client::new(),
            timeout: Duration::from_secs(8),
            max_retries: 3,
            notify_on_success,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    /// Post one text payload with bounded retries. A missing webhook URL is
    /// a quiet no-op, not an error.
    async fn post_text(&self, text: String) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            tracing::debug!("alert sink disabled (no webhook url)");
            return Ok(());
        };
        let body = json!({ "text": text });

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1)))
                                .await;
                            continue;
                        }
                        return Err(anyhow!("alert webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("alert webhook request failed: {e}"));
                }
            }
        }
    }

    /// Run-completion notification. Errors are logged and swallowed; a
    /// broken alert channel must never change a run's outcome.
    pub async fn notify_run(&self, alert: &RunAlert) {
        if alert.status == RunStatus::Success && !self.notify_on_success {
            return;
        }

        let mut text = format!(
            "[insight-pulse] run {} {:?}\ntrigger={} duration={}ms",
            alert.run_id,
            alert.status,
            alert.trigger.as_str(),
            alert.duration_ms,
        );
        if let Some(s) = &alert.summary {
            text.push_str(&format!(
                "\nfetched={} deduped={} insights={} events={} stale={}",
                s.items_fetched, s.duplicates_skipped, s.insights_scored, s.events_scored, s.stale_served,
            ));
        }
        if let Some(err) = &alert.error {
            let mut err = err.clone();
            err.truncate(500);
            text.push_str(&format!("\nerror={err}"));
        }

        if let Err(e) = self.post_text(text).await {
            tracing::warn!(error = %e, run_id = alert.run_id, "run alert delivery failed");
        }
    }

    /// Watchdog ping when a run outlives its soft timeout. Informational
    /// only; the run keeps going.
    pub async fn notify_soft_timeout(&self, run_id: u64, elapsed_secs: u64) {
        let text = format!(
            "[insight-pulse] run {run_id} still running after {elapsed_secs}s (soft timeout)"
        );
        if let Err(e) = self.post_text(text).await {
            tracing::warn!(error = %e, run_id, "soft-timeout alert delivery failed");
        }
    }
}
