//! Persisted run status
//!
//! [`AppStatus`] is the root document written to `status.json`. It is owned by
//! the orchestrator for the whole run and merged with the previous run's
//! status before every write.

use super::failure::FailureRecord;
use super::progress::{ApiDomain, Progress};
use crate::error::Error;
use crate::http::{FetchError, FetchErrorKind};
use crate::types::{JsonValue, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Error record
// ============================================================================

/// Kind of error retained in `current_error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    TokenMissing,
    TokenInvalid,
    DatabaseConnectionFailed,
    SchemaMismatch,
    RequestConnectionError,
    RequestTimeout,
    ApiInvalidParameter,
    ApiDataNotFound,
    ApiUnexpectedError,
    LoadFailed,
    UnknownError,
}

impl ErrorKind {
    /// Kind matching a fetch classification
    pub fn from_fetch(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => Self::RequestTimeout,
            FetchErrorKind::Connection => Self::RequestConnectionError,
            FetchErrorKind::InvalidRequest => Self::ApiInvalidParameter,
            FetchErrorKind::NotFound => Self::ApiDataNotFound,
            FetchErrorKind::RateLimited | FetchErrorKind::Server | FetchErrorKind::Decode => {
                Self::ApiUnexpectedError
            }
            FetchErrorKind::Unauthorized => Self::TokenInvalid,
            FetchErrorKind::MissingToken => Self::TokenMissing,
        }
    }
}

/// Structured error kept in [`AppStatus::current_error`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default)]
    pub detail: JsonValue,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: JsonValue::Null,
        }
    }

    /// Attach a structured payload
    pub fn with_detail(mut self, detail: JsonValue) -> Self {
        self.detail = detail;
        self
    }

    /// Record for a failed fetch, with the URL and status as detail
    pub fn from_fetch(err: &FetchError) -> Self {
        Self::new(ErrorKind::from_fetch(err.kind), err.message.clone()).with_detail(
            serde_json::json!({
                "url": err.url,
                "status": err.status,
            }),
        )
    }

    /// Record for a crate error of unknown provenance
    pub fn from_error(kind: ErrorKind, err: &Error) -> Self {
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

// ============================================================================
// AppStatus
// ============================================================================

/// Root of the persisted status document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    #[serde(default)]
    pub progress: Progress,

    #[serde(default)]
    pub current_error: Option<ErrorRecord>,

    /// Work units whose fetch failed
    #[serde(default)]
    pub fetch_failure_record: FailureRecord,

    /// Work units that were fetched but could not be stored
    #[serde(default)]
    pub db_save_failure_record: FailureRecord,

    #[serde(default)]
    pub config_file_path: Option<String>,

    /// Last successful outline access per form id
    #[serde(default)]
    pub form_api_last_access: BTreeMap<i64, Timestamp>,
}

impl AppStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status for a new run that continues from `previous`
    ///
    /// Progress and last-access times carry over; errors and failure records
    /// start empty and are filled by this run.
    pub fn continuing(previous: &AppStatus) -> Self {
        Self {
            progress: previous.progress.clone(),
            form_api_last_access: previous.form_api_last_access.clone(),
            config_file_path: previous.config_file_path.clone(),
            ..Self::default()
        }
    }

    /// Whether both failure records are empty
    pub fn has_no_failures(&self) -> bool {
        self.fetch_failure_record.is_empty() && self.db_save_failure_record.is_empty()
    }

    /// Record the most recent access time for a form, keeping the later one
    pub fn touch_last_access(&mut self, form_id: i64, at: Timestamp) {
        let entry = self.form_api_last_access.entry(form_id).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    /// Combine the previous run's status with the current one
    ///
    /// Progress, current error and config path come from `current`. For each
    /// failure domain, a domain whose stage the current run has passed keeps
    /// only the current identifiers; any other domain keeps the union. Last
    /// access times keep the later timestamp per form.
    pub fn merge(previous: &AppStatus, current: &AppStatus) -> AppStatus {
        let mut merged = AppStatus {
            progress: current.progress.clone(),
            current_error: current.current_error.clone(),
            fetch_failure_record: current.fetch_failure_record.clone(),
            db_save_failure_record: current.db_save_failure_record.clone(),
            config_file_path: current.config_file_path.clone(),
            form_api_last_access: previous.form_api_last_access.clone(),
        };

        for domain in ApiDomain::ALL {
            if current.progress.has_passed(domain.stage()) {
                continue;
            }
            merged
                .fetch_failure_record
                .union_domain(domain, &previous.fetch_failure_record);
            merged
                .db_save_failure_record
                .union_domain(domain, &previous.db_save_failure_record);
        }

        for (form_id, at) in &current.form_api_last_access {
            merged.touch_last_access(*form_id, *at);
        }

        merged
    }
}
