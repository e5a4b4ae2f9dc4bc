//! Sync query requests.

use ferrydb_core::{AuthMode, ModelSchema, QueryPredicate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of remote operation an authorization mode is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelOperation {
    /// Read (list, get and sync queries).
    Read,
    /// Create mutation.
    Create,
    /// Update mutation.
    Update,
    /// Delete mutation.
    Delete,
}

impl fmt::Display for ModelOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelOperation::Read => "read",
            ModelOperation::Create => "create",
            ModelOperation::Update => "update",
            ModelOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One page request of a model's sync query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncQueryRequest {
    /// Model being synced.
    pub model_name: String,
    /// Name of the remote sync query, e.g. `syncPosts`.
    pub operation_name: String,
    /// Remote filter.
    pub filter: QueryPredicate,
    /// Page size.
    pub limit: usize,
    /// Continuation token from the previous page.
    pub next_token: Option<String>,
    /// Authorization mode for this attempt.
    pub auth_mode: AuthMode,
    /// Last sync time in Unix milliseconds; `None` requests a full sync.
    pub last_sync: Option<i64>,
}

impl SyncQueryRequest {
    /// Creates a first-page full-sync request with the default auth mode.
    pub fn new(schema: &ModelSchema, filter: QueryPredicate, limit: usize) -> Self {
        Self {
            model_name: schema.name().to_string(),
            operation_name: schema.sync_query_name(),
            filter,
            limit,
            next_token: None,
            auth_mode: AuthMode::Default,
            last_sync: None,
        }
    }

    /// Sets the continuation token.
    #[must_use]
    pub fn with_next_token(mut self, next_token: Option<String>) -> Self {
        self.next_token = next_token;
        self
    }

    /// Sets the authorization mode.
    #[must_use]
    pub fn with_auth_mode(mut self, auth_mode: AuthMode) -> Self {
        self.auth_mode = auth_mode;
        self
    }

    /// Turns the request into a delta query from `last_sync`.
    #[must_use]
    pub fn with_last_sync(mut self, last_sync: Option<i64>) -> Self {
        self.last_sync = last_sync;
        self
    }

    /// Returns true if this is a delta query.
    pub fn is_delta(&self) -> bool {
        self.last_sync.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder() {
        let schema = ModelSchema::new("Post");
        let request = SyncQueryRequest::new(&schema, QueryPredicate::All, 1000)
            .with_auth_mode(AuthMode::ApiKey)
            .with_next_token(Some("abc".into()));

        assert_eq!(request.operation_name, "syncPosts");
        assert_eq!(request.auth_mode, AuthMode::ApiKey);
        assert_eq!(request.next_token.as_deref(), Some("abc"));
        assert!(!request.is_delta());
        assert!(request.with_last_sync(Some(10)).is_delta());
    }
}
