//! Transport layer abstraction for sync queries.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use ferrydb_core::AuthMode;
use ferrydb_sync_protocol::{SyncQueryRequest, LAST_CHANGED_AT_KEY};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A remote query transport.
///
/// The transport sends one sync query page request and returns the raw
/// response envelope. Decoding the envelope is left to the caller, so the
/// transport never needs to know the model types.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Runs one page of a sync query.
    ///
    /// # Errors
    ///
    /// [`SyncError::Unauthorized`] when the auth mode is rejected,
    /// [`SyncError::OperationDisabled`] when the query is disabled for the
    /// model, [`SyncError::Transport`] for network failures.
    async fn query(&self, request: SyncQueryRequest) -> SyncResult<Value>;
}

/// A failure the mock transport can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// Reject the auth mode.
    Unauthorized,
    /// Report the operation as disabled.
    OperationDisabled,
    /// Fail at the network level.
    Transport {
        /// Whether the failure is retryable.
        retryable: bool,
    },
}

impl ScriptedFailure {
    fn into_error(self, request: &SyncQueryRequest) -> SyncError {
        match self {
            ScriptedFailure::Unauthorized => SyncError::Unauthorized {
                auth_mode: request.auth_mode,
            },
            ScriptedFailure::OperationDisabled => SyncError::OperationDisabled {
                model: request.model_name.clone(),
            },
            ScriptedFailure::Transport { retryable: true } => {
                SyncError::transport_retryable("scripted network failure")
            }
            ScriptedFailure::Transport { retryable: false } => {
                SyncError::transport_fatal("scripted network failure")
            }
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    items: HashMap<String, Vec<Value>>,
    mode_failures: HashMap<(String, AuthMode), ScriptedFailure>,
    model_failures: HashMap<String, ScriptedFailure>,
    latency: HashMap<String, Duration>,
    raw_responses: HashMap<String, Value>,
    started_at: Option<i64>,
    requests: Vec<SyncQueryRequest>,
}

/// An in-memory remote for tests.
///
/// Serves seeded raw items per model, paginated by an offset token and
/// filtered by the request predicate and last-sync time. Responses use the
/// request's operation name as the outer key.
#[derive(Debug)]
pub struct MockTransport {
    state: Mutex<MockState>,
    connected: AtomicBool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            connected: AtomicBool::new(true),
        }
    }

    /// Adds raw items served for a model.
    pub fn seed(&self, model_name: impl Into<String>, items: impl IntoIterator<Item = Value>) {
        self.state
            .lock()
            .items
            .entry(model_name.into())
            .or_default()
            .extend(items);
    }

    /// Makes every request for `model_name` with `auth_mode` fail.
    pub fn fail_auth_mode(
        &self,
        model_name: impl Into<String>,
        auth_mode: AuthMode,
        failure: ScriptedFailure,
    ) {
        self.state
            .lock()
            .mode_failures
            .insert((model_name.into(), auth_mode), failure);
    }

    /// Makes every request for `model_name` fail, whatever the auth mode.
    pub fn fail_model(&self, model_name: impl Into<String>, failure: ScriptedFailure) {
        self.state
            .lock()
            .model_failures
            .insert(model_name.into(), failure);
    }

    /// Delays every response for `model_name`.
    pub fn set_latency(&self, model_name: impl Into<String>, latency: Duration) {
        self.state.lock().latency.insert(model_name.into(), latency);
    }

    /// Returns `response` verbatim for `model_name` instead of seeded items.
    pub fn set_raw_response(&self, model_name: impl Into<String>, response: Value) {
        self.state
            .lock()
            .raw_responses
            .insert(model_name.into(), response);
    }

    /// Fixes the `startedAt` value of responses.
    pub fn set_started_at(&self, started_at: i64) {
        self.state.lock().started_at = Some(started_at);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Checks if the transport is connected.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Returns every request received, in order.
    pub fn requests(&self) -> Vec<SyncQueryRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the auth modes tried for a model, in order.
    pub fn attempts_for(&self, model_name: &str) -> Vec<AuthMode> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.model_name == model_name)
            .map(|r| r.auth_mode)
            .collect()
    }

    fn respond(&self, request: &SyncQueryRequest) -> SyncResult<Value> {
        let state = self.state.lock();

        if let Some(failure) = state
            .mode_failures
            .get(&(request.model_name.clone(), request.auth_mode))
            .or_else(|| state.model_failures.get(&request.model_name))
        {
            return Err(failure.into_error(request));
        }
        if let Some(raw) = state.raw_responses.get(&request.model_name) {
            return Ok(raw.clone());
        }

        let matching: Vec<&Value> = state
            .items
            .get(&request.model_name)
            .map(|items| {
                items
                    .iter()
                    .filter(|item| {
                        item.as_object()
                            .map_or(true, |fields| request.filter.evaluate(fields))
                    })
                    .filter(|item| match request.last_sync {
                        Some(since) => item
                            .get(LAST_CHANGED_AT_KEY)
                            .and_then(Value::as_i64)
                            .map_or(true, |changed| changed > since),
                        None => true,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let offset = match &request.next_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SyncError::transport_fatal(format!("invalid next token {token}")))?,
            None => 0,
        };
        let end = offset.saturating_add(request.limit).min(matching.len());
        let page: Vec<Value> = matching
            .get(offset..end)
            .unwrap_or_default()
            .iter()
            .map(|item| (*item).clone())
            .collect();
        let next_token = (end < matching.len()).then(|| end.to_string());
        let started_at = state.started_at.unwrap_or_else(now_millis);

        let mut envelope = Map::new();
        envelope.insert(
            request.operation_name.clone(),
            json!({
                "items": page,
                "nextToken": next_token,
                "startedAt": started_at,
            }),
        );
        Ok(Value::Object(envelope))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn query(&self, request: SyncQueryRequest) -> SyncResult<Value> {
        let latency = {
            let mut state = self.state.lock();
            state.requests.push(request.clone());
            state.latency.get(&request.model_name).copied()
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_connected() {
            return Err(SyncError::transport_retryable("not connected"));
        }

        self.respond(&request)
    }
}

/// Current time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
