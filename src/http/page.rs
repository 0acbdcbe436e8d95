//! Paginated response shape
//!
//! A listing page is a JSON object carrying the records, a continuation link,
//! and an optional total count. Field names are configurable.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field names used to read a listing page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFormat {
    /// Path to the record array
    #[serde(default = "default_results_key")]
    pub results_key: String,
    /// Field holding the next page URL (null when exhausted)
    #[serde(default = "default_next_key")]
    pub next_key: String,
    /// Field holding the total record count
    #[serde(default = "default_count_key")]
    pub count_key: String,
}

fn default_results_key() -> String {
    "results".to_string()
}

fn default_next_key() -> String {
    "next".to_string()
}

fn default_count_key() -> String {
    "count".to_string()
}

impl Default for PageFormat {
    fn default() -> Self {
        Self {
            results_key: default_results_key(),
            next_key: default_next_key(),
            count_key: default_count_key(),
        }
    }
}

impl PageFormat {
    /// Same page shape with a different record path
    #[must_use]
    pub fn with_results_key(&self, key: impl Into<String>) -> Self {
        Self {
            results_key: key.into(),
            ..self.clone()
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// Records on this page
    pub results: Vec<Value>,
    /// Continuation, if there are more pages
    pub next: Option<String>,
    /// Total records reported by the server
    pub count: Option<u64>,
}

impl Page {
    /// Split a response body into records and continuation
    pub fn from_value(body: Value, format: &PageFormat) -> std::result::Result<Self, String> {
        let next = match body.get(&format.next_key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        };
        let count = body.get(&format.count_key).and_then(Value::as_u64);

        let plain_key = !format.results_key.contains(['.', '*', '$']);
        if plain_key && body.get(&format.results_key).is_none() {
            return Err(format!("response has no '{}' field", format.results_key));
        }
        let results =
            extract_records(&body, Some(&format.results_key)).map_err(|e| e.to_string())?;

        Ok(Self {
            results,
            next,
            count,
        })
    }
}

/// Extract the record list from a JSON document
///
/// With no path, an array is the record list and anything else is one record.
/// Paths with wildcards go through JSONPath; plain dotted paths are walked directly.
pub fn extract_records(value: &Value, path: Option<&str>) -> Result<Vec<Value>> {
    let Some(path) = path.filter(|p| !p.is_empty()) else {
        return Ok(match value {
            Value::Array(arr) => arr.clone(),
            other => vec![other.clone()],
        });
    };

    if path.contains('*') {
        return extract_with_jsonpath(value, path);
    }

    match extract_simple_path(value, path) {
        Some(Value::Array(arr)) => Ok(arr.clone()),
        Some(Value::Null) | None => Ok(vec![]),
        Some(v) => Ok(vec![v.clone()]),
    }
}

fn extract_simple_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => current.get(part)?,
        };
    }
    Some(current)
}

fn extract_with_jsonpath(value: &Value, path: &str) -> Result<Vec<Value>> {
    use jsonpath_rust::JsonPath;

    let jp = JsonPath::try_from(path).map_err(|e| Error::json_path(format!("'{path}': {e}")))?;

    match jp.find(value) {
        Value::Array(arr) => Ok(arr),
        Value::Null => Ok(vec![]),
        other => Ok(vec![other]),
    }
}
