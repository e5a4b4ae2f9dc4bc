//! Per-model one-time sync queue.

use crate::auth::AuthModeResolver;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::fetcher::RetryingFetcher;
use crate::transport::{now_millis, RemoteTransport};
use crate::writer::{ReconcileAndSaveQueue, ReconciliationOutcome, ReconciliationUnit};
use ferrydb_core::{ModelSchema, QueryPredicate, StorageAdapter, StorageAdapterExt};
use ferrydb_sync_protocol::{DropReason, ModelOperation, MutationEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Why a model stopped syncing without completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Every auth mode was rejected.
    Unauthorized,
    /// The sync query is disabled for the model.
    OperationDisabled,
}

/// An event emitted by a sync queue.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSyncEvent {
    /// The model completed its startup sync.
    Connected {
        /// Model name.
        model_name: String,
    },
    /// The model stopped for a reason that counts as settled.
    Disconnected {
        /// Model name.
        model_name: String,
        /// Why.
        reason: DisconnectReason,
    },
    /// A remote record was written.
    MutationApplied(MutationEvent),
    /// A remote record was skipped.
    MutationDropped {
        /// Model name.
        model_name: String,
        /// Why.
        reason: DropReason,
    },
    /// The model's sync failed terminally.
    Failed {
        /// Model name.
        model_name: String,
        /// The failure.
        error: String,
    },
}

impl ModelSyncEvent {
    /// Returns the model the event belongs to.
    pub fn model_name(&self) -> &str {
        match self {
            ModelSyncEvent::Connected { model_name }
            | ModelSyncEvent::Disconnected { model_name, .. }
            | ModelSyncEvent::MutationDropped { model_name, .. }
            | ModelSyncEvent::Failed { model_name, .. } => model_name,
            ModelSyncEvent::MutationApplied(event) => &event.model_name,
        }
    }

    /// Returns true if the event ends the model's startup sync.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ModelSyncEvent::Connected { .. }
                | ModelSyncEvent::Disconnected { .. }
                | ModelSyncEvent::Failed { .. }
        )
    }
}

/// Collaborators shared by every sync queue.
#[derive(Clone)]
pub struct QueueContext {
    /// Remote query transport.
    pub transport: Arc<dyn RemoteTransport>,
    /// Auth-mode resolver.
    pub auth_modes: Arc<dyn AuthModeResolver>,
    /// Local storage, for last-sync bookkeeping.
    pub storage: Arc<dyn StorageAdapter>,
    /// Shared serial writer.
    pub writer: ReconcileAndSaveQueue,
    /// Sync configuration.
    pub config: SyncConfig,
}

/// Fetches and reconciles every remote record of one model, once.
///
/// The queue follows `nextToken` until the last page or until
/// `sync_max_records` records were received, hands each page to the shared
/// writer and re-emits the writer's outcomes. It ends with exactly one
/// terminal event unless it is reset first.
pub struct OnetimeSyncQueue {
    schema: Arc<ModelSchema>,
    fetcher: Arc<RetryingFetcher>,
    context: QueueContext,
    events: mpsc::UnboundedSender<ModelSyncEvent>,
    cancel: CancellationToken,
    reset: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl OnetimeSyncQueue {
    /// Creates a queue for `schema`, resolving its auth-mode candidates.
    ///
    /// `cancel` is the parent token; cancelling it cancels this queue.
    pub async fn new(
        schema: Arc<ModelSchema>,
        predicate: QueryPredicate,
        context: QueueContext,
        events: mpsc::UnboundedSender<ModelSyncEvent>,
        cancel: &CancellationToken,
    ) -> Self {
        let candidates = context
            .auth_modes
            .candidate_modes(&schema, ModelOperation::Read)
            .await;
        let cancel = cancel.child_token();
        let fetcher = RetryingFetcher::new(
            Arc::clone(&schema),
            predicate,
            candidates,
            Arc::clone(&context.transport),
            context.config.clone(),
            cancel.child_token(),
        );

        Self {
            schema,
            fetcher: Arc::new(fetcher),
            context,
            events,
            cancel,
            reset: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Returns the model name.
    pub fn model_name(&self) -> &str {
        self.schema.name()
    }

    /// Returns the queue's fetcher.
    pub fn fetcher(&self) -> &Arc<RetryingFetcher> {
        &self.fetcher
    }

    /// Starts syncing in the background. Later calls are ignored.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() || self.reset.load(Ordering::SeqCst) {
            return;
        }

        let run = QueueRun {
            schema: Arc::clone(&self.schema),
            fetcher: Arc::clone(&self.fetcher),
            context: self.context.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        };
        let span = tracing::info_span!("sync_queue", model = %self.schema.name());
        *handle = Some(tokio::spawn(run.run().instrument(span)));
    }

    /// Cancels the in-flight fetch and detaches from the writer.
    ///
    /// Idempotent. A unit already handed to the writer still completes, but
    /// its outcomes are no longer forwarded.
    pub fn reset(&self) {
        if self.reset.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(model = %self.schema.name(), "resetting sync queue");
        self.cancel.cancel();
    }

    /// Returns true once reset.
    pub fn is_reset(&self) -> bool {
        self.reset.load(Ordering::SeqCst)
    }

    /// Waits for the background run to end.
    pub async fn join(&self) -> SyncResult<()> {
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|err| SyncError::TaskFailed(err.to_string())),
            None => Ok(()),
        }
    }
}

struct QueueRun {
    schema: Arc<ModelSchema>,
    fetcher: Arc<RetryingFetcher>,
    context: QueueContext,
    events: mpsc::UnboundedSender<ModelSyncEvent>,
    cancel: CancellationToken,
}

impl QueueRun {
    async fn run(self) {
        let model_name = self.schema.name().to_string();

        let terminal = match self.sync_all().await {
            Ok(received) => {
                info!(received, "model sync complete");
                ModelSyncEvent::Connected { model_name }
            }
            Err(SyncError::Cancelled) => {
                debug!("model sync cancelled");
                return;
            }
            Err(err) if err.is_unauthorized() => {
                warn!(error = %err, "model sync unauthorized");
                ModelSyncEvent::Disconnected {
                    model_name,
                    reason: DisconnectReason::Unauthorized,
                }
            }
            Err(SyncError::OperationDisabled { .. }) => {
                warn!("sync query disabled for model");
                ModelSyncEvent::Disconnected {
                    model_name,
                    reason: DisconnectReason::OperationDisabled,
                }
            }
            Err(err) => {
                warn!(error = %err, "model sync failed");
                ModelSyncEvent::Failed {
                    model_name,
                    error: err.to_string(),
                }
            }
        };

        if !self.cancel.is_cancelled() {
            self.emit(terminal);
        }
    }

    async fn sync_all(&self) -> SyncResult<usize> {
        let model_name = self.schema.name().to_string();
        let config = &self.context.config;

        let last_sync = self
            .with_storage({
                let model_name = model_name.clone();
                move |storage| storage.last_sync(&model_name)
            })
            .await?;
        let since = config.delta_since(last_sync, now_millis());
        debug!(delta = since.is_some(), "starting model sync");

        let mut next_token = None;
        let mut received = 0;
        let mut started_at = None;

        loop {
            let remaining = config.sync_max_records.saturating_sub(received);
            let mut page = self
                .fetcher
                .fetch_page(next_token.take(), since, remaining)
                .await?;
            if page.results.len() > remaining {
                debug!(
                    returned = page.results.len(),
                    remaining,
                    "remote ignored the page limit, truncating"
                );
                page.results.truncate(remaining);
            }
            received += page.item_count();
            started_at = started_at.or(page.started_at);

            for failure in &page.dropped {
                debug!(index = failure.index, error = %failure.message, "dropping undecodable item");
                self.emit(ModelSyncEvent::MutationDropped {
                    model_name: model_name.clone(),
                    reason: DropReason::Decode(failure.message.clone()),
                });
            }

            if !page.results.is_empty() {
                let outcomes = self.context.writer.submit(ReconciliationUnit {
                    schema: Arc::clone(&self.schema),
                    results: page.results,
                });
                self.forward(outcomes).await?;
            }

            match page.next_token {
                Some(token) if received < config.sync_max_records => next_token = Some(token),
                Some(_) => {
                    debug!(received, "record cap reached, stopping pagination");
                    break;
                }
                None => break,
            }
        }

        if let Some(started_at) = started_at {
            self.with_storage(move |storage| {
                storage.transaction(|txn| txn.set_last_sync(&model_name, started_at))
            })
            .await?;
        }

        Ok(received)
    }

    async fn forward(
        &self,
        mut outcomes: mpsc::UnboundedReceiver<ReconciliationOutcome>,
    ) -> SyncResult<()> {
        loop {
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                outcome = outcomes.recv() => outcome,
            };

            match outcome {
                Some(ReconciliationOutcome::Applied(event)) => {
                    self.emit(ModelSyncEvent::MutationApplied(event));
                }
                Some(ReconciliationOutcome::Dropped { model_name, reason }) => {
                    self.emit(ModelSyncEvent::MutationDropped { model_name, reason });
                }
                None => return Ok(()),
            }
        }
    }

    async fn with_storage<T, F>(&self, f: F) -> SyncResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn StorageAdapter) -> ferrydb_core::CoreResult<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.context.storage);
        let result = tokio::task::spawn_blocking(move || f(storage.as_ref()))
            .await
            .map_err(|err| SyncError::TaskFailed(err.to_string()))?;
        Ok(result?)
    }

    fn emit(&self, event: ModelSyncEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::DefaultAuthModeResolver;
    use crate::config::RetryConfig;
    use crate::transport::{MockTransport, ScriptedFailure};
    use ferrydb_core::{FieldType, MemoryStore, ModelField};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn post_schema() -> Arc<ModelSchema> {
        Arc::new(ModelSchema::new("Post").field(ModelField::new("title", FieldType::String)))
    }

    fn raw(id: &str, version: u64) -> Value {
        json!({"id": id, "title": "t", "_version": version, "_lastChangedAt": 10})
    }

    fn context(transport: Arc<MockTransport>, store: Arc<MemoryStore>, config: SyncConfig) -> QueueContext {
        QueueContext {
            transport,
            auth_modes: Arc::new(DefaultAuthModeResolver),
            storage: store.clone(),
            writer: ReconcileAndSaveQueue::new(store),
            config: config.with_retry(RetryConfig::immediate()),
        }
    }

    async fn run_to_end(
        context: QueueContext,
    ) -> Vec<ModelSyncEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = OnetimeSyncQueue::new(
            post_schema(),
            QueryPredicate::All,
            context,
            tx,
            &CancellationToken::new(),
        )
        .await;
        queue.start();
        queue.join().await.unwrap();
        drop(queue);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn syncs_all_pages_then_connects() {
        let transport = Arc::new(MockTransport::new());
        transport.seed("Post", (0..5).map(|i| raw(&format!("p{i}"), 1)));
        transport.set_started_at(1_234);
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));

        let events = run_to_end(context(
            Arc::clone(&transport),
            Arc::clone(&store),
            SyncConfig::new().with_sync_page_size(2),
        ))
        .await;

        let applied = events
            .iter()
            .filter(|e| matches!(e, ModelSyncEvent::MutationApplied(_)))
            .count();
        assert_eq!(applied, 5);
        assert_eq!(
            events.last(),
            Some(&ModelSyncEvent::Connected {
                model_name: "Post".into()
            })
        );
        assert_eq!(transport.requests().len(), 3);
        assert_eq!(store.live_count("Post"), 5);
        assert_eq!(store.last_sync("Post").unwrap(), Some(1_234));
    }

    #[tokio::test]
    async fn record_cap_stops_pagination() {
        let transport = Arc::new(MockTransport::new());
        transport.seed("Post", (0..10).map(|i| raw(&format!("p{i}"), 1)));
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));

        run_to_end(context(
            Arc::clone(&transport),
            Arc::clone(&store),
            SyncConfig::new()
                .with_sync_page_size(3)
                .with_sync_max_records(5),
        ))
        .await;

        let limits: Vec<usize> = transport.requests().iter().map(|r| r.limit).collect();
        assert_eq!(limits, vec![3, 2]);
        assert_eq!(store.live_count("Post"), 5);
    }

    #[tokio::test]
    async fn oversized_page_is_truncated_to_cap() {
        let transport = Arc::new(MockTransport::new());
        let items: Vec<Value> = (0..4).map(|i| raw(&format!("p{i}"), 1)).collect();
        transport.set_raw_response(
            "Post",
            json!({"syncPosts": {"items": items, "nextToken": null, "startedAt": 7}}),
        );
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));

        run_to_end(context(
            Arc::clone(&transport),
            Arc::clone(&store),
            SyncConfig::new().with_sync_max_records(2),
        ))
        .await;

        assert_eq!(store.live_count("Post"), 2);
    }

    #[tokio::test]
    async fn recent_last_sync_requests_delta() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));
        let recent = now_millis() - 1_000;
        store
            .transaction(|txn| txn.set_last_sync("Post", recent))
            .unwrap();

        run_to_end(context(
            Arc::clone(&transport),
            Arc::clone(&store),
            SyncConfig::new(),
        ))
        .await;

        assert_eq!(transport.requests()[0].last_sync, Some(recent));
    }

    #[tokio::test]
    async fn old_last_sync_requests_full_sync() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));
        store
            .transaction(|txn| txn.set_last_sync("Post", 5))
            .unwrap();

        run_to_end(context(
            Arc::clone(&transport),
            Arc::clone(&store),
            SyncConfig::new().with_sync_interval(Duration::from_secs(60)),
        ))
        .await;

        assert_eq!(transport.requests()[0].last_sync, None);
    }

    #[tokio::test]
    async fn malformed_items_are_dropped() {
        let transport = Arc::new(MockTransport::new());
        transport.seed("Post", [raw("p1", 1), json!({"title": "no id", "_version": 1, "_lastChangedAt": 1})]);
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));

        let events = run_to_end(context(transport, Arc::clone(&store), SyncConfig::new())).await;

        assert!(events.iter().any(|e| matches!(
            e,
            ModelSyncEvent::MutationDropped {
                reason: DropReason::Decode(_),
                ..
            }
        )));
        assert!(matches!(events.last(), Some(ModelSyncEvent::Connected { .. })));
        assert_eq!(store.live_count("Post"), 1);
    }

    #[tokio::test]
    async fn terminal_events_for_failures() {
        let cases = [
            (
                ScriptedFailure::Unauthorized,
                Some(DisconnectReason::Unauthorized),
            ),
            (
                ScriptedFailure::OperationDisabled,
                Some(DisconnectReason::OperationDisabled),
            ),
            (ScriptedFailure::Transport { retryable: false }, None),
        ];

        for (failure, expected) in cases {
            let transport = Arc::new(MockTransport::new());
            transport.fail_model("Post", failure);
            let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));

            let events = run_to_end(context(transport, store, SyncConfig::new())).await;
            assert_eq!(events.len(), 1);
            match (expected, &events[0]) {
                (Some(reason), ModelSyncEvent::Disconnected { reason: got, .. }) => {
                    assert_eq!(*got, reason)
                }
                (None, ModelSyncEvent::Failed { .. }) => {}
                (_, other) => panic!("unexpected event {other:?} for {failure:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_idempotent_and_silent() {
        let transport = Arc::new(MockTransport::new());
        transport.seed("Post", [raw("p1", 1)]);
        transport.set_latency("Post", Duration::from_secs(10));
        let store = Arc::new(MemoryStore::with_schemas([post_schema().as_ref()]));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let queue = OnetimeSyncQueue::new(
            post_schema(),
            QueryPredicate::All,
            context(transport, Arc::clone(&store), SyncConfig::new()),
            tx,
            &CancellationToken::new(),
        )
        .await;
        queue.start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        queue.reset();
        queue.reset();
        queue.join().await.unwrap();
        drop(queue);

        assert!(rx.recv().await.is_none());
        assert_eq!(store.live_count("Post"), 0);
    }
}
