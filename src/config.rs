//! Integrator configuration
//!
//! A YAML document with a default for every field, so an empty file is a
//! valid configuration. The loaded value is treated as an immutable snapshot
//! for the whole run.
//!
//! ```yaml
//! app_dir: ./formsync_data
//! api:
//!   base_url: https://ssl.wf.jobcan.jp/wf_api
//!   token_env: JOBCAN_API_TOKEN
//! rate_limit:
//!   requests: 5
//!   window_secs: 1
//! skip:
//!   form_detail: true
//! ```

use crate::error::{Error, Result};
use crate::http::{HttpApiConfig, PageFormat, RateLimitConfig, RetryPolicy};
use crate::types::Timestamp;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const STATUS_FILE: &str = "status.json";
const TEMP_DIR: &str = "temp";
const TEMP_INDEX_FILE: &str = "form_outline_temp.json";
const DATABASE_FILE: &str = "formsync.duckdb";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete configuration for one integration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratorConfig {
    /// Directory holding the status document and temporary files
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,

    /// DuckDB file; defaults to a file inside `app_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Built-in pipeline name or path to a pipeline YAML file
    #[serde(default = "default_pipeline")]
    pub pipeline: String,

    /// Remote API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Request budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for recoverable fetch failures
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Link and table names used by each phase
    #[serde(default)]
    pub domains: DomainConfig,

    /// Phases to skip
    #[serde(default)]
    pub skip: SkipConfig,

    /// Keep going when basic data cannot be saved
    #[serde(default = "default_true")]
    pub ignore_basic_data_error: bool,

    /// File this config was read from
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

fn default_app_dir() -> PathBuf {
    PathBuf::from("./formsync_data")
}

fn default_pipeline() -> String {
    "jobcan".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for IntegratorConfig {
    fn default() -> Self {
        Self {
            app_dir: default_app_dir(),
            database_path: None,
            pipeline: default_pipeline(),
            api: ApiConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            domains: DomainConfig::default(),
            skip: SkipConfig::default(),
            ignore_basic_data_error: true,
            source_path: None,
        }
    }
}

impl IntegratorConfig {
    /// Load and validate a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::FileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                Error::config(format!("Failed to read config '{}': {e}", path.display()))
            }
        })?;

        let mut config = Self::from_yaml_str(&content)?;
        config.source_path = Some(path.to_path_buf());
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate a config document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| Error::config(format!("Failed to parse config YAML: {e}")))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.app_dir.as_os_str().is_empty() {
            return Err(Error::missing_field("app_dir"));
        }
        if self.pipeline.trim().is_empty() {
            return Err(Error::missing_field("pipeline"));
        }
        url::Url::parse(&self.api.base_url).map_err(|e| {
            Error::invalid_value("api.base_url", format!("{e}"))
        })?;
        if self.api.timeout_secs == 0 {
            return Err(Error::invalid_value(
                "api.timeout_secs",
                "must be greater than zero",
            ));
        }
        if !self.api.detail_path.contains("{id}") {
            return Err(Error::invalid_value(
                "api.detail_path",
                "must contain an {id} placeholder",
            ));
        }
        if self.api.utc_offset_hours.abs() > 23 {
            return Err(Error::invalid_value(
                "api.utc_offset_hours",
                "must be between -23 and 23",
            ));
        }
        self.rate_limit.interval()?;
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(Error::invalid_value(
                "retry.initial_backoff_ms",
                "must not exceed retry.max_backoff_ms",
            ));
        }
        Ok(())
    }

    /// Persisted AppStatus document
    pub fn status_path(&self) -> PathBuf {
        self.app_dir.join(STATUS_FILE)
    }

    /// Directory for crash-safe intermediate files
    pub fn temp_dir(&self) -> PathBuf {
        self.app_dir.join(TEMP_DIR)
    }

    /// Persisted TempIndex document
    pub fn temp_index_path(&self) -> PathBuf {
        self.temp_dir().join(TEMP_INDEX_FILE)
    }

    /// DuckDB file location
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.app_dir.join(DATABASE_FILE))
    }
}

// ============================================================================
// API
// ============================================================================

/// Remote API endpoints and conventions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL all endpoint paths are joined onto
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Token given inline; takes precedence over `token_env`
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Environment variable holding the token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Credential check
    #[serde(default = "default_check_path")]
    pub check_path: String,

    /// Request outline listing
    #[serde(default = "default_outline_path")]
    pub outline_path: String,

    /// Query parameter selecting the form
    #[serde(default = "default_outline_form_param")]
    pub outline_form_param: String,

    /// Query parameter for the incremental window
    #[serde(default = "default_outline_since_param")]
    pub outline_since_param: String,

    /// Extra query appended to every outline request
    #[serde(default = "default_outline_extra_query")]
    pub outline_extra_query: String,

    /// Field holding the request id in an outline record
    #[serde(default = "default_outline_id_field")]
    pub outline_id_field: String,

    /// Request detail endpoint; `{id}` is replaced by the request id
    #[serde(default = "default_detail_path")]
    pub detail_path: String,

    /// Offset of the API's local time, used for the incremental window
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,

    /// Listing page shape
    #[serde(flatten)]
    pub page: PageFormat,
}

fn default_base_url() -> String {
    "https://ssl.wf.jobcan.jp/wf_api".to_string()
}

fn default_token_env() -> String {
    "JOBCAN_API_TOKEN".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_check_path() -> String {
    "/test/".to_string()
}

fn default_outline_path() -> String {
    "/v2/requests/".to_string()
}

fn default_outline_form_param() -> String {
    "form_id".to_string()
}

fn default_outline_since_param() -> String {
    "applied_after".to_string()
}

fn default_outline_extra_query() -> String {
    "include_canceled=true".to_string()
}

fn default_outline_id_field() -> String {
    "id".to_string()
}

fn default_detail_path() -> String {
    "/v1/requests/{id}/".to_string()
}

fn default_utc_offset_hours() -> i32 {
    9
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            check_path: default_check_path(),
            outline_path: default_outline_path(),
            outline_form_param: default_outline_form_param(),
            outline_since_param: default_outline_since_param(),
            outline_extra_query: default_outline_extra_query(),
            outline_id_field: default_outline_id_field(),
            detail_path: default_detail_path(),
            utc_offset_hours: default_utc_offset_hours(),
            page: PageFormat::default(),
        }
    }
}

impl ApiConfig {
    /// Inline token, else the environment variable; blank values count as missing
    pub fn resolve_token(&self) -> Option<String> {
        self.token
            .clone()
            .or_else(|| std::env::var(&self.token_env).ok())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Client settings for `HttpApi`
    pub fn http_config(&self, token: Option<String>) -> HttpApiConfig {
        HttpApiConfig {
            base_url: self.base_url.clone(),
            token,
            timeout: Duration::from_secs(self.timeout_secs),
            check_path: self.check_path.clone(),
            ..HttpApiConfig::default()
        }
    }

    /// First outline page for a form, limited to requests after `since`
    pub fn outline_url(&self, form_id: i64, since: Option<Timestamp>) -> String {
        let mut query = url::form_urlencoded::Serializer::new(String::new());
        query.append_pair(&self.outline_form_param, &form_id.to_string());
        if let Some(since) = since {
            query.append_pair(&self.outline_since_param, &self.format_since(since));
        }
        let mut query = query.finish();
        if !self.outline_extra_query.is_empty() {
            query.push('&');
            query.push_str(&self.outline_extra_query);
        }
        format!("{}?{query}", self.outline_path)
    }

    /// Detail endpoint for one request
    pub fn detail_url(&self, request_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(request_id.as_bytes()).collect();
        self.detail_path.replace("{id}", &encoded)
    }

    fn format_since(&self, since: Timestamp) -> String {
        let offset = FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        since
            .with_timezone(&offset)
            .format("%Y/%m/%d %H:%M:%S")
            .to_string()
    }
}

// ============================================================================
// Domains and phase switches
// ============================================================================

/// Pipeline links and tables each phase works with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default = "default_users_link")]
    pub users_link: String,
    #[serde(default = "default_groups_link")]
    pub groups_link: String,
    #[serde(default = "default_positions_link")]
    pub positions_link: String,
    #[serde(default = "default_forms_link")]
    pub forms_link: String,
    /// Link whose profiles load one request detail
    #[serde(default = "default_detail_link")]
    pub detail_link: String,
    /// Table the form ids are read from
    #[serde(default = "default_forms_table")]
    pub forms_table: String,
    #[serde(default = "default_form_id_column")]
    pub form_id_column: String,
}

fn default_users_link() -> String {
    "users".to_string()
}

fn default_groups_link() -> String {
    "groups".to_string()
}

fn default_positions_link() -> String {
    "positions".to_string()
}

fn default_forms_link() -> String {
    "forms".to_string()
}

fn default_detail_link() -> String {
    "request_detail".to_string()
}

fn default_forms_table() -> String {
    "forms".to_string()
}

fn default_form_id_column() -> String {
    "id".to_string()
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            users_link: default_users_link(),
            groups_link: default_groups_link(),
            positions_link: default_positions_link(),
            forms_link: default_forms_link(),
            detail_link: default_detail_link(),
            forms_table: default_forms_table(),
            form_id_column: default_form_id_column(),
        }
    }
}

/// Phases to leave out of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipConfig {
    #[serde(default)]
    pub basic_data: bool,
    #[serde(default)]
    pub form_outline: bool,
    #[serde(default)]
    pub form_detail: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_is_default() {
        let config = IntegratorConfig::from_yaml_str("").unwrap();
        assert_eq!(config, IntegratorConfig::default());
        assert_eq!(config.pipeline, "jobcan");
        assert!(config.ignore_basic_data_error);
        assert_eq!(config.api.page, PageFormat::default());
    }

    #[test]
    fn test_paths_derive_from_app_dir() {
        let config = IntegratorConfig::from_yaml_str("app_dir: /var/lib/formsync").unwrap();
        assert_eq!(config.status_path(), PathBuf::from("/var/lib/formsync/status.json"));
        assert_eq!(
            config.temp_index_path(),
            PathBuf::from("/var/lib/formsync/temp/form_outline_temp.json")
        );
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/formsync/formsync.duckdb")
        );

        let config =
            IntegratorConfig::from_yaml_str("app_dir: /a\ndatabase_path: /b/db.duckdb").unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/b/db.duckdb"));
    }

    #[test]
    fn test_full_document() {
        let yaml = r"
app_dir: /data
pipeline: ./custom.yaml
api:
  base_url: http://localhost:9000/api
  token: abc
  results_key: items
rate_limit:
  requests: 10
  window_secs: 2
retry:
  max_retries: 5
  backoff: linear
domains:
  forms_table: form_master
skip:
  basic_data: true
ignore_basic_data_error: false
";
        let config = IntegratorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.api.resolve_token().as_deref(), Some("abc"));
        assert_eq!(config.api.page.results_key, "items");
        assert_eq!(config.api.page.next_key, "next");
        assert_eq!(
            config.rate_limit.interval().unwrap(),
            Duration::from_millis(200)
        );
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.domains.forms_table, "form_master");
        assert_eq!(config.domains.users_link, "users");
        assert!(config.skip.basic_data);
        assert!(!config.skip.form_detail);
        assert!(!config.ignore_basic_data_error);
    }

    #[test]
    fn test_invalid_values_rejected() {
        for yaml in [
            "api:\n  base_url: not a url",
            "api:\n  timeout_secs: 0",
            "api:\n  detail_path: /v1/requests/",
            "pipeline: ''",
            "retry:\n  initial_backoff_ms: 5000\n  max_backoff_ms: 100",
            "unknown_shape: [",
        ] {
            assert!(
                IntegratorConfig::from_yaml_str(yaml).is_err(),
                "accepted: {yaml}"
            );
        }
    }

    #[test]
    fn test_load_records_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formsync.yaml");
        std::fs::write(&path, "pipeline: jobcan\n").unwrap();

        let config = IntegratorConfig::load(&path).unwrap();
        assert_eq!(config.source_path.as_deref(), Some(path.as_path()));

        let err = IntegratorConfig::load(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_outline_url() {
        let api = ApiConfig::default();
        assert_eq!(
            api.outline_url(12, None),
            "/v2/requests/?form_id=12&include_canceled=true"
        );

        let since = Utc.with_ymd_and_hms(2024, 1, 31, 15, 30, 0).unwrap();
        assert_eq!(
            api.outline_url(12, Some(since)),
            "/v2/requests/?form_id=12&applied_after=2024%2F02%2F01+00%3A30%3A00&include_canceled=true"
        );
    }

    #[test]
    fn test_detail_url() {
        let api = ApiConfig::default();
        assert_eq!(api.detail_url("sa-100"), "/v1/requests/sa-100/");
        assert_eq!(api.detail_url("a/b"), "/v1/requests/a%2Fb/");
    }

    #[test]
    fn test_blank_token_is_missing() {
        let api = ApiConfig {
            token: Some("  ".to_string()),
            token_env: "FORMSYNC_TEST_TOKEN_THAT_IS_NEVER_SET".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(api.resolve_token(), None);
    }
}
