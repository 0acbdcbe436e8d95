//! Throttled fetch layer
//!
//! Every remote call goes through `ThrottledFetcher`, which takes a permit from
//! the shared [`Throttle`], issues the call, and classifies the result into a
//! [`FetchError`] the caller can act on. Recoverable failures are retried per
//! the caller-supplied [`RetryPolicy`]; each retry takes a fresh permit, so the
//! configured budget holds across retries too.

use super::client::{ApiError, RemoteApi};
use super::page::{Page, PageFormat};
use super::rate_limit::Throttle;
use crate::types::BackoffType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// ============================================================================
// Fetch outcome
// ============================================================================

/// Classification of a failed fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Request timed out
    Timeout,
    /// Connection could not be established
    Connection,
    /// 400 or 422 from the API
    InvalidRequest,
    /// 404 from the API
    NotFound,
    /// 429 from the API
    RateLimited,
    /// 5xx or any other unexpected status
    Server,
    /// Body was not valid JSON or lacked the expected shape
    Decode,
    /// 401 or 403: the token was rejected
    Unauthorized,
    /// No token configured
    MissingToken,
}

/// A failed fetch, classified at the fetch boundary
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} fetching '{url}': {message}")]
pub struct FetchError {
    /// Target URL or path
    pub url: String,
    /// Classification
    pub kind: FetchErrorKind,
    /// Detail message
    pub message: String,
    /// HTTP status, when the server answered
    pub status: Option<u16>,
}

impl FetchError {
    /// Create a fetch error
    pub fn new(url: impl Into<String>, kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// A `next` link pointing back at a page already fetched
    pub fn pagination_loop(url: &str) -> Self {
        Self::new(url, FetchErrorKind::Decode, "pagination loop: next link repeats")
    }

    /// Fatal errors halt the run; everything else is recorded and retried next run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Unauthorized | FetchErrorKind::MissingToken
        )
    }

    /// Whether an immediate retry within this run could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            FetchErrorKind::Timeout
                | FetchErrorKind::Connection
                | FetchErrorKind::RateLimited
                | FetchErrorKind::Server
        )
    }
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        let message = err.to_string();
        let url = err.url().to_string();
        let (kind, status) = match &err {
            ApiError::MissingToken => (FetchErrorKind::MissingToken, None),
            ApiError::Timeout { .. } => (FetchErrorKind::Timeout, None),
            ApiError::Connect { .. } => (FetchErrorKind::Connection, None),
            ApiError::Decode { .. } => (FetchErrorKind::Decode, None),
            ApiError::InvalidUrl { .. } => (FetchErrorKind::InvalidRequest, None),
            ApiError::Status { status, .. } => {
                let kind = match *status {
                    401 | 403 => FetchErrorKind::Unauthorized,
                    404 => FetchErrorKind::NotFound,
                    400 | 422 => FetchErrorKind::InvalidRequest,
                    429 => FetchErrorKind::RateLimited,
                    _ => FetchErrorKind::Server,
                };
                (kind, Some(*status))
            }
        };
        Self {
            url,
            kind,
            message,
            status,
        }
    }
}

/// Result of a throttled fetch
pub type FetchResult<T> = std::result::Result<T, FetchError>;

// ============================================================================
// Retry policy
// ============================================================================

/// How many times, and how patiently, transient failures are retried
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffType,
    /// First delay, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff: BackoffType::default(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Never retry within a run
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(
            attempt,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Counters recorded through `release`
#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    recoverable: AtomicU64,
    fatal: AtomicU64,
}

/// Snapshot of fetch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchStats {
    /// Calls that succeeded
    pub succeeded: u64,
    /// Calls that failed recoverably
    pub recoverable: u64,
    /// Calls that failed fatally
    pub fatal: u64,
}

impl FetchStats {
    /// Total calls issued
    pub fn total(&self) -> u64 {
        self.succeeded + self.recoverable + self.fatal
    }
}

// ============================================================================
// Fetcher
// ============================================================================

/// Serializes remote calls through a shared throttle
#[derive(Clone)]
pub struct ThrottledFetcher {
    api: Arc<dyn RemoteApi>,
    throttle: Throttle,
    retry: RetryPolicy,
    counters: Arc<Counters>,
}

impl ThrottledFetcher {
    /// Create a fetcher over `api`
    pub fn new(api: Arc<dyn RemoteApi>, throttle: Throttle, retry: RetryPolicy) -> Self {
        Self {
            api,
            throttle,
            retry,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Block until one remote call may be issued
    pub async fn acquire(&self) {
        self.throttle.acquire().await;
    }

    /// Record the outcome of a call
    pub fn release<T>(&self, outcome: &FetchResult<T>) {
        let counter = match outcome {
            Ok(_) => &self.counters.succeeded,
            Err(e) if e.is_fatal() => &self.counters.fatal,
            Err(_) => &self.counters.recoverable,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counters
    pub fn stats(&self) -> FetchStats {
        FetchStats {
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            recoverable: self.counters.recoverable.load(Ordering::Relaxed),
            fatal: self.counters.fatal.load(Ordering::Relaxed),
        }
    }

    /// Verify the API credentials
    pub async fn check(&self) -> FetchResult<()> {
        self.acquire().await;
        let outcome = self.api.check().await.map_err(FetchError::from);
        self.release(&outcome);
        outcome
    }

    /// Fetch one JSON document, retrying transient failures per policy
    pub async fn fetch_json(&self, path: &str) -> FetchResult<Value> {
        let mut attempt = 0;
        loop {
            self.acquire().await;
            let outcome = self.api.get_json(path).await.map_err(FetchError::from);
            self.release(&outcome);

            match outcome {
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        "Fetch of {} failed ({:?}), attempt {}/{}, retrying in {:?}",
                        path,
                        e.kind,
                        attempt + 1,
                        self.retry.max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Fetch a single page and split it into records and continuation
    pub async fn fetch_page(&self, path: &str, format: &PageFormat) -> FetchResult<Page> {
        let body = self.fetch_json(path).await?;
        Page::from_value(body, format)
            .map_err(|message| FetchError::new(path, FetchErrorKind::Decode, message))
    }

    /// Follow `next` links from `path` until the listing is exhausted
    pub async fn fetch_all(&self, path: &str, format: &PageFormat) -> FetchResult<Vec<Value>> {
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(path.to_string());
        while let Some(url) = next {
            if !visited.insert(url.clone()) {
                return Err(FetchError::pagination_loop(&url));
            }
            let page = self.fetch_page(&url, format).await?;
            debug!(
                "Fetched {} records from {} (count: {:?})",
                page.results.len(),
                url,
                page.count
            );
            records.extend(page.results);
            next = page.next;
        }
        Ok(records)
    }

    /// Fetch a single entity
    pub async fn fetch_one(&self, path: &str) -> FetchResult<Value> {
        self.fetch_json(path).await
    }
}

impl std::fmt::Debug for ThrottledFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledFetcher")
            .field("throttle", &self.throttle)
            .field("retry", &self.retry)
            .finish()
    }
}
