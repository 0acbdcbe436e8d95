//! Remote API collaborator
//!
//! `RemoteApi` is the seam between the fetch layer and the network. `HttpApi`
//! implements it with reqwest, resolving relative paths against a base URL
//! and attaching the `Authorization: Token <token>` header.

use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Low-level failure of one remote call, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No API token was configured
    MissingToken,
    /// The request exceeded its timeout
    Timeout { url: String, timeout_ms: u64 },
    /// The connection could not be established or was dropped
    Connect { url: String, message: String },
    /// The server answered with a non-success status
    Status {
        url: String,
        status: u16,
        message: String,
    },
    /// The body was not valid JSON
    Decode { url: String, message: String },
    /// The path could not be resolved into a URL
    InvalidUrl { url: String, message: String },
}

impl ApiError {
    /// URL the failing call targeted, if known
    pub fn url(&self) -> &str {
        match self {
            ApiError::MissingToken => "",
            ApiError::Timeout { url, .. }
            | ApiError::Connect { url, .. }
            | ApiError::Status { url, .. }
            | ApiError::Decode { url, .. }
            | ApiError::InvalidUrl { url, .. } => url,
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::MissingToken => write!(f, "API token is not configured"),
            ApiError::Timeout { url, timeout_ms } => {
                write!(f, "request to {url} timed out after {timeout_ms}ms")
            }
            ApiError::Connect { url, message } => {
                write!(f, "connection to {url} failed: {message}")
            }
            ApiError::Status {
                url,
                status,
                message,
            } => write!(f, "{url} returned HTTP {status}: {message}"),
            ApiError::Decode { url, message } => write!(f, "invalid JSON from {url}: {message}"),
            ApiError::InvalidUrl { url, message } => write!(f, "invalid URL '{url}': {message}"),
        }
    }
}

/// Result of a single remote call
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Remote API exposing paginated list endpoints and single-entity endpoints
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Call the API to verify the credentials
    async fn check(&self) -> ApiResult<()>;

    /// GET a JSON document from an absolute URL or a path relative to the base URL
    async fn get_json(&self, path: &str) -> ApiResult<Value>;
}

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Base URL all relative paths are joined onto
    pub base_url: String,
    /// API token, if one was resolved
    pub token: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Path requested by `check`
    pub check_path: String,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost".to_string(),
            token: None,
            timeout: Duration::from_secs(30),
            check_path: "/test/".to_string(),
            user_agent: format!("formsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// reqwest-backed implementation of [`RemoteApi`]
pub struct HttpApi {
    client: Client,
    base: Url,
    config: HttpApiConfig,
}

impl HttpApi {
    /// Create a new HTTP API client
    pub fn new(config: HttpApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        // A trailing slash keeps Url::join from dropping the last base segment
        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)?;

        Ok(Self {
            client,
            base,
            config,
        })
    }

    /// Resolve a path or absolute URL against the base URL
    pub fn resolve(&self, path: &str) -> ApiResult<Url> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path).map_err(|e| ApiError::InvalidUrl {
                url: path.to_string(),
                message: e.to_string(),
            });
        }
        // Root-relative links from the server already carry the base path
        let relative = if path.starts_with(self.base.path()) {
            path
        } else {
            path.trim_start_matches('/')
        };
        self.base
            .join(relative)
            .map_err(|e| ApiError::InvalidUrl {
                url: path.to_string(),
                message: e.to_string(),
            })
    }

    async fn send(&self, path: &str) -> ApiResult<reqwest::Response> {
        let token = self.config.token.as_deref().ok_or(ApiError::MissingToken)?;
        let url = self.resolve(path)?;
        let url_str = url.to_string();

        debug!("GET {}", url_str);
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("Token {token}"))
            .send()
            .await
            .map_err(|e| classify_transport_error(&url_str, &e, self.config.timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            url: url_str,
            status: status.as_u16(),
            message: extract_message(status, &body),
        })
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn check(&self) -> ApiResult<()> {
        let path = self.config.check_path.clone();
        self.send(&path).await.map(|_| ())
    }

    async fn get_json(&self, path: &str) -> ApiResult<Value> {
        let response = self.send(path).await?;
        let url = response.url().to_string();
        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout {
                    url,
                    timeout_ms: self.config.timeout.as_millis() as u64,
                }
            } else {
                ApiError::Decode {
                    url,
                    message: e.to_string(),
                }
            }
        })
    }
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base", &self.base.as_str())
            .field("has_token", &self.config.token.is_some())
            .finish()
    }
}

fn classify_transport_error(url: &str, e: &reqwest::Error, timeout: Duration) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout {
            url: url.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        ApiError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}

/// Pull a human-readable message out of an error body (`{"message": ...}` or raw text)
fn extract_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "detail", "error"] {
            if let Some(Value::String(msg)) = map.get(key) {
                return msg.clone();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected status")
            .to_string()
    } else {
        body.chars().take(200).collect()
    }
}
