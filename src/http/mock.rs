//! In-memory `RemoteApi` for tests

use super::client::{ApiError, ApiResult, RemoteApi};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Scripted API: fixed responses per path, with optional one-shot overrides
#[derive(Default)]
pub(crate) struct MockApi {
    routes: Mutex<HashMap<String, ApiResult<Value>>>,
    prefixes: Mutex<Vec<(String, Value)>>,
    once: Mutex<HashMap<String, VecDeque<ApiResult<Value>>>>,
    check: Mutex<Option<ApiError>>,
    calls: Mutex<Vec<String>>,
}

impl MockApi {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Always answer `path` with `body`
    pub(crate) fn on(&self, path: &str, body: Value) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Ok(body));
        self
    }

    /// Answer any path starting with `prefix` that has no exact route
    pub(crate) fn on_prefix(&self, prefix: &str, body: Value) -> &Self {
        self.prefixes
            .lock()
            .unwrap()
            .push((prefix.to_string(), body));
        self
    }

    /// Always fail `path` with `error`
    pub(crate) fn fail(&self, path: &str, error: ApiError) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), Err(error));
        self
    }

    /// Fail the next call to `path` only
    pub(crate) fn fail_once(&self, path: &str, error: ApiError) -> &Self {
        self.once
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    /// Make the credential check fail
    pub(crate) fn reject_check(&self, error: ApiError) -> &Self {
        *self.check.lock().unwrap() = Some(error);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == path).count()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// A 404 for `path`
pub(crate) fn not_found(path: &str) -> ApiError {
    ApiError::Status {
        url: path.to_string(),
        status: 404,
        message: "Not Found".to_string(),
    }
}

/// A timeout for `path`
pub(crate) fn timeout(path: &str) -> ApiError {
    ApiError::Timeout {
        url: path.to_string(),
        timeout_ms: 100,
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn check(&self) -> ApiResult<()> {
        self.calls.lock().unwrap().push("<check>".to_string());
        match self.check.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_json(&self, path: &str) -> ApiResult<Value> {
        self.calls.lock().unwrap().push(path.to_string());
        if let Some(queued) = self
            .once
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
        {
            return queued;
        }
        if let Some(routed) = self.routes.lock().unwrap().get(path).cloned() {
            return routed;
        }
        self.prefixes
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, body)| Ok(body.clone()))
            .unwrap_or_else(|| Err(not_found(path)))
    }
}
