//! Rate limiting implementation
//!
//! Uses the governor crate to serialize permits at a fixed minimum interval.
//! A request budget per time window is converted into the equivalent interval
//! (`interval = window / budget`) and enforced with a burst of one, so no two
//! permits are ever granted closer together than that interval.

use crate::error::{Error, Result};
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for request throttling
///
/// Either `interval_ms` or `requests` (per `window_secs`) may be set.
/// When both are present the fixed interval wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Fixed minimum interval between requests, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,
    /// Request budget per window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<u32>,
    /// Window length in seconds for `requests`
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_window_secs() -> u64 {
    1
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_ms: Some(1000),
            requests: None,
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    /// Create a config with a fixed interval between requests
    pub fn fixed_interval(interval: Duration) -> Self {
        Self {
            interval_ms: Some(interval.as_millis() as u64),
            requests: None,
            window_secs: default_window_secs(),
        }
    }

    /// Create a config from a request budget per window
    pub fn per_window(requests: u32, window: Duration) -> Self {
        Self {
            interval_ms: None,
            requests: Some(requests),
            window_secs: window.as_secs(),
        }
    }

    /// Create a config with no throttling at all
    pub fn unlimited() -> Self {
        Self {
            interval_ms: Some(0),
            requests: None,
            window_secs: default_window_secs(),
        }
    }

    /// Resolve the effective minimum interval between permits
    pub fn interval(&self) -> Result<Duration> {
        if let Some(ms) = self.interval_ms {
            return Ok(Duration::from_millis(ms));
        }
        match self.requests {
            Some(0) => Err(Error::invalid_value(
                "rate_limit.requests",
                "request budget must be at least 1",
            )),
            Some(n) => Ok(Duration::from_secs(self.window_secs) / n),
            None => Err(Error::invalid_value(
                "rate_limit",
                "either interval_ms or requests must be set",
            )),
        }
    }
}

/// Fixed-interval permit dispenser shared by every fetch
#[derive(Clone)]
pub struct Throttle {
    limiter: Option<Arc<Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>>>,
    interval: Duration,
}

impl Throttle {
    /// Create a throttle from the given config
    pub fn new(config: &RateLimitConfig) -> Result<Self> {
        Ok(Self::with_interval(config.interval()?))
    }

    /// Create a throttle for a fixed interval; a zero interval disables throttling
    pub fn with_interval(interval: Duration) -> Self {
        // Quota::with_period has an implicit burst of one
        let limiter = Quota::with_period(interval).map(|quota| Arc::new(Governor::direct(quota)));
        Self { limiter, interval }
    }

    /// Wait until a request may be issued
    pub async fn acquire(&self) {
        if let Some(ref limiter) = self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Try to take a permit without waiting
    pub fn try_acquire(&self) -> bool {
        self.limiter
            .as_ref()
            .map_or(true, |limiter| limiter.check().is_ok())
    }

    /// The enforced minimum interval
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("interval", &self.interval)
            .finish()
    }
}
