//! Typed error categories for the pipeline.
//!
//! Fetch, parse and persistence failures are handled very differently
//! (retry/fallback vs. skip vs. abort), so they get their own types instead
//! of one opaque `anyhow` blob. `anyhow` stays in use at application seams.

use thiserror::Error;

/// A fetch attempt (or a whole fetch, after retries) failed.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out after {0} ms")]
    Timeout(u64),
    #[error("http status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("proxy error: {0}")]
    Proxy(String),
}

impl FetchError {
    /// Proxy/network-class failures rotate the proxy pool before retrying;
    /// plain HTTP statuses do not.
    pub fn rotates_proxy(&self) -> bool {
        matches!(self, FetchError::Proxy(_) | FetchError::Network(_) | FetchError::Timeout(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status(code) => *code == 429 || (500..600).contains(code),
            FetchError::Timeout(_) | FetchError::Network(_) | FetchError::Proxy(_) => true,
        }
    }
}

/// A source body came back but could not be parsed. Logged and skipped;
/// never fails the run.
#[derive(Debug, Error)]
#[error("malformed content from {source_name}: {detail}")]
pub struct ParseError {
    pub source_name: String,
    pub detail: String,
}

impl ParseError {
    pub fn new(source_name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            detail: detail.into(),
        }
    }
}

/// Persistence boundary errors. Unique-constraint conflicts never surface
/// here; upserts treat them as idempotent success.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a pipeline run is already in progress")]
    RunInProgress,
    #[error("row {0} has no parent row to attach to")]
    MissingParent(u64),
    #[error("persistence failure: {0}")]
    Backend(String),
}

/// Structured failure returned by the run-trigger operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline run is already in progress")]
    RunInProgress,
    #[error("run cancelled: {0}")]
    Cancelled(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    /// Stable category tag surfaced to API callers.
    pub fn category(&self) -> &'static str {
        match self {
            PipelineError::RunInProgress => "run_in_progress",
            PipelineError::Cancelled(_) => "cancelled",
            PipelineError::Persistence(_) => "persistence",
        }
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunInProgress => PipelineError::RunInProgress,
            other => PipelineError::Persistence(other.to_string()),
        }
    }
}
