//! Retrying remote fetcher.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::RemoteTransport;
use ferrydb_core::{ModelSchema, QueryPredicate};
use ferrydb_sync_protocol::{AuthModeCandidates, PageEnvelope, SyncPage, SyncQueryRequest};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Fetches pages of a model's sync query, falling back across auth modes.
///
/// Each page fetch walks the candidate list once: the first candidate that
/// returns a page wins, a retryable failure moves on to the next one, any
/// other failure ends the fetch. A fetch therefore makes at most
/// `candidates.len()` attempts.
pub struct RetryingFetcher {
    schema: Arc<ModelSchema>,
    predicate: QueryPredicate,
    candidates: AuthModeCandidates,
    transport: Arc<dyn RemoteTransport>,
    config: SyncConfig,
    cancel: CancellationToken,
    attempts: AtomicUsize,
}

impl RetryingFetcher {
    /// Creates a fetcher.
    ///
    /// Cancelling `cancel` (or a parent of it) abandons the in-flight attempt.
    pub fn new(
        schema: Arc<ModelSchema>,
        predicate: QueryPredicate,
        candidates: AuthModeCandidates,
        transport: Arc<dyn RemoteTransport>,
        config: SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            schema,
            predicate,
            candidates,
            transport,
            config,
            cancel,
            attempts: AtomicUsize::new(0),
        }
    }

    /// Returns the schema being fetched.
    pub fn schema(&self) -> &Arc<ModelSchema> {
        &self.schema
    }

    /// Returns the auth-mode candidates.
    pub fn candidates(&self) -> &AuthModeCandidates {
        &self.candidates
    }

    /// Returns the number of transport attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Abandons the in-flight attempt. No further attempt is made.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fetches one page of at most `limit` records.
    ///
    /// `limit` is capped at the configured page size. `last_sync` turns the
    /// request into a delta query.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Cancelled`] if cancelled before a page arrived
    /// - [`SyncError::AuthModesExhausted`] if every candidate failed with a
    ///   retryable error, or there was no candidate
    /// - the first non-retryable error otherwise
    #[instrument(skip(self), fields(model = %self.schema.name()))]
    pub async fn fetch_page(
        &self,
        next_token: Option<String>,
        last_sync: Option<i64>,
        limit: usize,
    ) -> SyncResult<SyncPage> {
        let limit = limit.min(self.config.sync_page_size);
        let mut last_error = None;
        let mut attempt: u32 = 0;

        for auth_mode in self.candidates.attempts() {
            if self.cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let delay = self.config.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            attempt += 1;
            self.attempts.fetch_add(1, Ordering::SeqCst);

            let request = SyncQueryRequest::new(
                &self.schema,
                self.predicate.clone(),
                limit,
            )
            .with_next_token(next_token.clone())
            .with_auth_mode(auth_mode)
            .with_last_sync(last_sync);

            let response = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                response = self.transport.query(request) => response,
            };

            match response.and_then(|raw| Ok(PageEnvelope::from_value(&raw)?)) {
                Ok(envelope) => {
                    let page = envelope.decode(&self.schema);
                    debug!(
                        %auth_mode,
                        attempt,
                        records = page.results.len(),
                        dropped = page.dropped.len(),
                        "fetched page"
                    );
                    return Ok(page);
                }
                Err(err) if err.is_retryable() => {
                    warn!(%auth_mode, error = %err, "auth mode failed, trying next candidate");
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        warn!(attempts = attempt, "auth mode candidates exhausted");
        Err(SyncError::AuthModesExhausted {
            model: self.schema.name().to_string(),
            attempts: attempt as usize,
            last_error: last_error.map(Box::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::{MockTransport, ScriptedFailure};
    use ferrydb_core::{AuthMode, FieldType, ModelField};
    use serde_json::json;
    use std::time::Duration;

    fn post_schema() -> Arc<ModelSchema> {
        Arc::new(ModelSchema::new("Post").field(ModelField::new("title", FieldType::String)))
    }

    fn fetcher(transport: Arc<MockTransport>, modes: &[AuthMode]) -> RetryingFetcher {
        RetryingFetcher::new(
            post_schema(),
            QueryPredicate::All,
            AuthModeCandidates::new(modes.iter().copied()),
            transport,
            SyncConfig::new().with_retry(RetryConfig::immediate()),
            CancellationToken::new(),
        )
    }

    const PAGE: usize = 1_000;

    const MODES: [AuthMode; 3] = [AuthMode::UserPools, AuthMode::Iam, AuthMode::ApiKey];

    fn seeded() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.seed(
            "Post",
            [json!({"id": "p1", "title": "a", "_version": 1, "_lastChangedAt": 1})],
        );
        transport
    }

    #[tokio::test]
    async fn first_candidate_succeeds() {
        let transport = seeded();
        let fetcher = fetcher(Arc::clone(&transport), &MODES);

        let page = fetcher.fetch_page(None, None, PAGE).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(fetcher.attempts(), 1);
        assert_eq!(transport.attempts_for("Post"), vec![AuthMode::UserPools]);
    }

    #[tokio::test]
    async fn limit_is_capped_at_page_size() {
        let transport = seeded();
        let fetcher = RetryingFetcher::new(
            post_schema(),
            QueryPredicate::All,
            AuthModeCandidates::new(MODES),
            Arc::clone(&transport) as Arc<dyn RemoteTransport>,
            SyncConfig::new().with_sync_page_size(4),
            CancellationToken::new(),
        );

        fetcher.fetch_page(None, None, 2).await.unwrap();
        fetcher.fetch_page(None, None, 50).await.unwrap();

        let limits: Vec<usize> = transport.requests().iter().map(|r| r.limit).collect();
        assert_eq!(limits, vec![2, 4]);
    }

    #[tokio::test]
    async fn falls_back_until_success() {
        let transport = seeded();
        transport.fail_auth_mode("Post", AuthMode::UserPools, ScriptedFailure::Unauthorized);
        transport.fail_auth_mode(
            "Post",
            AuthMode::Iam,
            ScriptedFailure::Transport { retryable: true },
        );
        let fetcher = fetcher(Arc::clone(&transport), &MODES);

        let page = fetcher.fetch_page(None, None, PAGE).await.unwrap();
        assert_eq!(page.results.len(), 1);
        assert_eq!(fetcher.attempts(), 3);
        assert_eq!(transport.attempts_for("Post"), MODES.to_vec());
    }

    #[tokio::test]
    async fn exhaustion_after_every_candidate() {
        let transport = seeded();
        transport.fail_model("Post", ScriptedFailure::Unauthorized);
        let fetcher = fetcher(Arc::clone(&transport), &MODES);

        let err = fetcher.fetch_page(None, None, PAGE).await.unwrap_err();
        match &err {
            SyncError::AuthModesExhausted { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.is_unauthorized());
        assert_eq!(fetcher.attempts(), 3);
    }

    #[tokio::test]
    async fn empty_candidate_list_is_exhausted() {
        let fetcher = fetcher(seeded(), &[]);
        let err = fetcher.fetch_page(None, None, PAGE).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::AuthModesExhausted { attempts: 0, last_error: None, .. }
        ));
    }

    #[tokio::test]
    async fn non_retryable_error_stops_fallback() {
        let transport = seeded();
        transport.fail_auth_mode("Post", AuthMode::UserPools, ScriptedFailure::OperationDisabled);
        let fetcher = fetcher(Arc::clone(&transport), &MODES);

        let err = fetcher.fetch_page(None, None, PAGE).await.unwrap_err();
        assert!(matches!(err, SyncError::OperationDisabled { .. }));
        assert_eq!(fetcher.attempts(), 1);
    }

    #[tokio::test]
    async fn malformed_envelope_is_not_retried() {
        let transport = seeded();
        transport.set_raw_response("Post", json!({"syncPosts": 7}));
        let fetcher = fetcher(Arc::clone(&transport), &MODES);

        let err = fetcher.fetch_page(None, None, PAGE).await.unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
        assert_eq!(fetcher.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_abandons_in_flight_attempt() {
        let transport = seeded();
        transport.set_latency("Post", Duration::from_secs(30));
        let fetcher = Arc::new(fetcher(Arc::clone(&transport), &MODES));

        let task = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { fetcher.fetch_page(None, None, PAGE).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        fetcher.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert_eq!(fetcher.attempts(), 1);
        assert!(fetcher.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_between_candidates() {
        let transport = seeded();
        transport.fail_auth_mode("Post", AuthMode::UserPools, ScriptedFailure::Unauthorized);
        let fetcher = RetryingFetcher::new(
            post_schema(),
            QueryPredicate::All,
            AuthModeCandidates::new(MODES),
            transport,
            SyncConfig::new().with_retry(
                RetryConfig::new().with_initial_delay(Duration::from_millis(500)),
            ),
            CancellationToken::new(),
        );

        let start = tokio::time::Instant::now();
        fetcher.fetch_page(None, None, PAGE).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
