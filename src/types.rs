//! Common types used throughout formsync
//!
//! Shared type aliases and small enums used across multiple modules.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// UTC timestamp used for last-access bookkeeping
pub type Timestamp = chrono::DateTime<chrono::Utc>;

// ============================================================================
// Backoff Type
// ============================================================================

/// Backoff strategy for retrying recoverable fetch failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

impl BackoffType {
    /// Delay before retry number `attempt` (zero-based), capped at `max`
    pub fn delay(self, attempt: u32, initial: Duration, max: Duration) -> Duration {
        let delay = match self {
            BackoffType::Constant => initial,
            BackoffType::Linear => initial.saturating_mul(attempt + 1),
            BackoffType::Exponential => initial.saturating_mul(2u32.saturating_pow(attempt)),
        };
        delay.min(max)
    }
}
