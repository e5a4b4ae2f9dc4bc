//! Startup sync coordinator.
//!
//! The coordinator starts one [`OnetimeSyncQueue`] per syncable model and
//! aggregates their terminal events into a single readiness signal.
//!
//! ## State machine
//!
//! ```text
//! Idle ──start──▶ Awaiting { reported, total } ──all reported──▶ Initialized
//!   │                    │
//!   └──────cancel────────┴──────────────▶ Cancelled
//! ```
//!
//! The readiness map lives inside a status actor task; queues only send it
//! messages. The actor is the single place the "all reported" check runs,
//! so `SyncQueriesReady` and `Ready` are dispatched exactly once whatever
//! the order in which models finish.

use crate::error::{SyncError, SyncResult};
use crate::notifier::{DataStoreEvent, LifecycleNotifier};
use crate::queue::{ModelSyncEvent, OnetimeSyncQueue, QueueContext};
use ferrydb_core::SchemaRegistry;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// The coordinator's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Not started.
    Idle,
    /// Queues are running.
    Awaiting {
        /// Models that have reported.
        reported: usize,
        /// Models started.
        total: usize,
    },
    /// Every started model has reported.
    Initialized,
    /// Torn down; cannot be restarted.
    Cancelled,
}

impl CoordinatorState {
    /// Returns true for the states `start` and `wait_until_initialized`
    /// never leave.
    pub fn is_final(&self) -> bool {
        matches!(self, CoordinatorState::Initialized | CoordinatorState::Cancelled)
    }
}

/// Result of reporting a model to a [`ReadinessTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Recorded; other models are still outstanding.
    Pending {
        /// Models reported so far.
        reported: usize,
        /// Models tracked.
        total: usize,
    },
    /// Recorded, and it was the last outstanding model.
    NewlyInitialized,
    /// The model had already reported.
    AlreadyReported,
    /// The model is not tracked.
    Unknown,
}

/// Tracks which models have reported a terminal outcome.
#[derive(Debug, Clone, Default)]
pub struct ReadinessTracker {
    readiness: HashMap<String, bool>,
    reported: usize,
}

impl ReadinessTracker {
    /// Creates a tracker for the given models. Duplicates count once.
    pub fn new(models: impl IntoIterator<Item = String>) -> Self {
        Self {
            readiness: models.into_iter().map(|model| (model, false)).collect(),
            reported: 0,
        }
    }

    /// Returns the number of tracked models.
    pub fn total(&self) -> usize {
        self.readiness.len()
    }

    /// Returns the number of models that have reported.
    pub fn reported(&self) -> usize {
        self.reported
    }

    /// Returns true once every tracked model has reported.
    pub fn is_initialized(&self) -> bool {
        self.reported == self.total()
    }

    /// Records that `model_name` has reported.
    pub fn report(&mut self, model_name: &str) -> ReportOutcome {
        let Some(ready) = self.readiness.get_mut(model_name) else {
            return ReportOutcome::Unknown;
        };
        if *ready {
            return ReportOutcome::AlreadyReported;
        }

        *ready = true;
        self.reported += 1;
        if self.is_initialized() {
            ReportOutcome::NewlyInitialized
        } else {
            ReportOutcome::Pending {
                reported: self.reported,
                total: self.total(),
            }
        }
    }
}

/// Runs the one-time startup sync of every syncable model.
pub struct StartupSyncCoordinator {
    registry: Arc<dyn SchemaRegistry>,
    context: QueueContext,
    notifier: Arc<dyn LifecycleNotifier>,
    state: Arc<watch::Sender<CoordinatorState>>,
    cancel: CancellationToken,
    queues: Mutex<Vec<Arc<OnetimeSyncQueue>>>,
    status: Mutex<Option<JoinHandle<()>>>,
}

impl StartupSyncCoordinator {
    /// Creates an idle coordinator.
    pub fn new(
        registry: Arc<dyn SchemaRegistry>,
        context: QueueContext,
        notifier: Arc<dyn LifecycleNotifier>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            registry,
            context,
            notifier,
            state: Arc::new(state),
            cancel: CancellationToken::new(),
            queues: Mutex::new(Vec::new()),
            status: Mutex::new(None),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Returns the names of the models being synced.
    pub fn model_names(&self) -> Vec<String> {
        self.queues
            .lock()
            .iter()
            .map(|q| q.model_name().to_string())
            .collect()
    }

    /// Starts one sync queue per syncable model.
    ///
    /// Models without a sync filter and repeated model names are skipped
    /// with a warning and not waited for. With no model left, the
    /// coordinator is initialized at once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] unless the coordinator
    /// is idle.
    pub async fn start(&self) -> SyncResult<()> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for schema in self.registry.syncable_model_schemas() {
            let model_name = schema.name().to_string();
            if !seen.insert(model_name.clone()) {
                warn!(model = %model_name, "duplicate model name, skipping");
                continue;
            }
            let Some(predicate) = self.registry.filter_predicate(&model_name) else {
                warn!(model = %model_name, "no sync expression for model, skipping");
                continue;
            };
            selected.push((schema, predicate));
        }
        let total = selected.len();

        let mut from = CoordinatorState::Idle;
        let started = self.state.send_if_modified(|state| {
            from = *state;
            if *state == CoordinatorState::Idle {
                *state = CoordinatorState::Awaiting { reported: 0, total };
                true
            } else {
                false
            }
        });
        if !started {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{from:?}"),
                to: "Awaiting".into(),
            });
        }
        info!(models = total, "starting startup sync");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let actor = StatusActor {
            tracker: ReadinessTracker::new(selected.iter().map(|(s, _)| s.name().to_string())),
            notifier: Arc::clone(&self.notifier),
            state: Arc::clone(&self.state),
        };
        let handle = tokio::spawn(
            actor
                .run(events_rx, self.cancel.clone())
                .instrument(tracing::info_span!("startup_sync_status")),
        );
        *self.status.lock() = Some(handle);

        for (schema, predicate) in selected {
            let queue = OnetimeSyncQueue::new(
                schema,
                predicate,
                self.context.clone(),
                events_tx.clone(),
                &self.cancel,
            )
            .await;
            let queue = Arc::new(queue);
            queue.start();
            self.queues.lock().push(queue);
        }

        Ok(())
    }

    /// Waits until every started model has reported.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] if the coordinator is cancelled
    /// first.
    pub async fn wait_until_initialized(&self) -> SyncResult<()> {
        let mut state = self.state.subscribe();
        let reached = state
            .wait_for(CoordinatorState::is_final)
            .await
            .map(|state| *state);

        match reached {
            Ok(CoordinatorState::Initialized) => Ok(()),
            _ => Err(SyncError::Cancelled),
        }
    }

    /// Tears down every queue and the status actor.
    ///
    /// Idempotent; a cancelled coordinator cannot be started again.
    pub fn cancel(&self) {
        if self.state.send_replace(CoordinatorState::Cancelled) == CoordinatorState::Cancelled {
            return;
        }

        self.cancel.cancel();
        for queue in self.queues.lock().drain(..) {
            queue.reset();
        }
        debug!("startup sync cancelled");
    }

    /// Waits for the status actor to stop.
    ///
    /// The actor stops on cancellation, or once every queue is gone.
    pub async fn join(&self) -> SyncResult<()> {
        let handle = self.status.lock().take();
        match handle {
            Some(handle) => handle
                .await
                .map_err(|err| SyncError::TaskFailed(err.to_string())),
            None => Ok(()),
        }
    }
}

impl Drop for StartupSyncCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct StatusActor {
    tracker: ReadinessTracker,
    notifier: Arc<dyn LifecycleNotifier>,
    state: Arc<watch::Sender<CoordinatorState>>,
}

impl StatusActor {
    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<ModelSyncEvent>,
        cancel: CancellationToken,
    ) {
        if self.tracker.is_initialized() {
            self.initialize();
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            self.handle(event);
        }
        debug!("status actor stopped");
    }

    fn handle(&mut self, event: ModelSyncEvent) {
        match event {
            ModelSyncEvent::MutationApplied(mutation) => {
                self.notifier
                    .dispatch(DataStoreEvent::MutationApplied(mutation));
            }
            ModelSyncEvent::MutationDropped { model_name, reason } => {
                self.notifier
                    .dispatch(DataStoreEvent::MutationDropped { model_name, reason });
            }
            terminal => self.report(terminal),
        }
    }

    fn report(&mut self, event: ModelSyncEvent) {
        let model_name = event.model_name().to_string();
        let outcome = self.tracker.report(&model_name);

        if matches!(
            outcome,
            ReportOutcome::Pending { .. } | ReportOutcome::NewlyInitialized
        ) {
            debug!(model = %model_name, ?event, "model reported");
            if let ModelSyncEvent::Connected { .. } = event {
                self.notifier
                    .dispatch(DataStoreEvent::ModelSynced { model_name: model_name.clone() });
            }
        }

        match outcome {
            ReportOutcome::Pending { reported, total } => {
                self.set_state(CoordinatorState::Awaiting { reported, total });
            }
            ReportOutcome::NewlyInitialized => self.initialize(),
            ReportOutcome::AlreadyReported => {
                debug!(model = %model_name, "ignoring repeated report");
            }
            ReportOutcome::Unknown => {
                warn!(model = %model_name, "report from untracked model");
            }
        }
    }

    /// Runs once: the tracker reports `NewlyInitialized` a single time and
    /// an empty tracker never reports it.
    fn initialize(&self) {
        if *self.state.borrow() == CoordinatorState::Cancelled {
            return;
        }
        info!(models = self.tracker.total(), "startup sync initialized");
        // Dispatch before waiters observe the state change.
        self.notifier.dispatch(DataStoreEvent::SyncQueriesReady);
        self.notifier.dispatch(DataStoreEvent::Ready);
        self.set_state(CoordinatorState::Initialized);
    }

    /// Moves to `next` unless cancelled.
    fn set_state(&self, next: CoordinatorState) {
        self.state.send_if_modified(|state| {
            if *state == CoordinatorState::Cancelled || *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DisconnectReason;
    use ferrydb_sync_protocol::DropReason;
    use ferrydb_testkit::{model_names_strategy, report_order_strategy};
    use proptest::prelude::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<DataStoreEvent>>,
    }

    impl LifecycleNotifier for Recorder {
        fn dispatch(&self, event: DataStoreEvent) {
            self.events.lock().push(event);
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Report {
        Connected,
        Unauthorized,
        OperationDisabled,
        Failed,
        Dropped,
    }

    fn report_strategy() -> impl Strategy<Value = Report> {
        prop_oneof![
            Just(Report::Connected),
            Just(Report::Unauthorized),
            Just(Report::OperationDisabled),
            Just(Report::Failed),
            Just(Report::Dropped),
        ]
    }

    fn sync_event(model_name: &str, report: Report) -> ModelSyncEvent {
        let model_name = model_name.to_string();
        match report {
            Report::Connected => ModelSyncEvent::Connected { model_name },
            Report::Unauthorized => ModelSyncEvent::Disconnected {
                model_name,
                reason: DisconnectReason::Unauthorized,
            },
            Report::OperationDisabled => ModelSyncEvent::Disconnected {
                model_name,
                reason: DisconnectReason::OperationDisabled,
            },
            Report::Failed => ModelSyncEvent::Failed {
                model_name,
                error: "boom".into(),
            },
            Report::Dropped => ModelSyncEvent::MutationDropped {
                model_name,
                reason: DropReason::Decode("bad item".into()),
            },
        }
    }

    /// What the status actor should dispatch for `reports`, in order.
    fn expected_dispatches(names: &[String], reports: &[(usize, Report)]) -> Vec<DataStoreEvent> {
        let mut expected = Vec::new();
        let mut reported = HashSet::new();
        if names.is_empty() {
            expected.push(DataStoreEvent::SyncQueriesReady);
            expected.push(DataStoreEvent::Ready);
        }
        for &(index, report) in reports {
            let model_name = names[index].clone();
            if let Report::Dropped = report {
                expected.push(DataStoreEvent::MutationDropped {
                    model_name,
                    reason: DropReason::Decode("bad item".into()),
                });
                continue;
            }
            if !reported.insert(index) {
                continue;
            }
            if let Report::Connected = report {
                expected.push(DataStoreEvent::ModelSynced { model_name });
            }
            if reported.len() == names.len() {
                expected.push(DataStoreEvent::SyncQueriesReady);
                expected.push(DataStoreEvent::Ready);
            }
        }
        expected
    }

    fn run_actor(
        names: &[String],
        reports: &[(usize, Report)],
    ) -> (Vec<DataStoreEvent>, CoordinatorState) {
        let notifier = Arc::new(Recorder::default());
        let (state, _) = watch::channel(CoordinatorState::Awaiting {
            reported: 0,
            total: names.len(),
        });
        let state = Arc::new(state);
        let actor = StatusActor {
            tracker: ReadinessTracker::new(names.iter().cloned()),
            notifier: notifier.clone(),
            state: Arc::clone(&state),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        for &(index, report) in reports {
            tx.send(sync_event(&names[index], report)).unwrap();
        }
        drop(tx);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(actor.run(rx, CancellationToken::new()));

        let events = notifier.events.lock().clone();
        let final_state = *state.borrow();
        (events, final_state)
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Model{i}")).collect()
    }

    #[test]
    fn tracker_counts_each_model_once() {
        let mut tracker = ReadinessTracker::new(names(2));

        assert_eq!(
            tracker.report("Model0"),
            ReportOutcome::Pending {
                reported: 1,
                total: 2
            }
        );
        assert_eq!(tracker.report("Model0"), ReportOutcome::AlreadyReported);
        assert_eq!(tracker.report("Other"), ReportOutcome::Unknown);
        assert_eq!(tracker.report("Model1"), ReportOutcome::NewlyInitialized);
        assert_eq!(tracker.report("Model1"), ReportOutcome::AlreadyReported);
        assert!(tracker.is_initialized());
    }

    #[test]
    fn empty_tracker_is_initialized() {
        let tracker = ReadinessTracker::new(Vec::new());
        assert!(tracker.is_initialized());
        assert_eq!(tracker.total(), 0);
    }

    #[test]
    fn final_states() {
        assert!(CoordinatorState::Initialized.is_final());
        assert!(CoordinatorState::Cancelled.is_final());
        assert!(!CoordinatorState::Awaiting {
            reported: 0,
            total: 1
        }
        .is_final());
    }

    #[test]
    fn actor_ignores_reports_after_cancel() {
        let names = vec!["Post".to_string()];
        let notifier = Arc::new(Recorder::default());
        let (state, _) = watch::channel(CoordinatorState::Cancelled);
        let mut actor = StatusActor {
            tracker: ReadinessTracker::new(names.iter().cloned()),
            notifier: notifier.clone(),
            state: Arc::new(state),
        };

        actor.handle(sync_event("Post", Report::Failed));

        assert!(notifier.events.lock().is_empty());
    }

    proptest! {
        #[test]
        fn actor_dispatches_ready_once_after_last_distinct_report(
            (names, reports) in model_names_strategy(6).prop_flat_map(|names| {
                let n = names.len();
                (Just(names), report_order_strategy(n))
            })
            .prop_flat_map(|(names, order)| {
                let len = order.len();
                (
                    Just(names),
                    Just(order),
                    prop::collection::vec(report_strategy(), len),
                )
            })
            .prop_map(|(names, order, kinds)| {
                let reports: Vec<(usize, Report)> = order.into_iter().zip(kinds).collect();
                (names, reports)
            })
        ) {
            let (events, state) = run_actor(&names, &reports);

            let ready = events.iter().filter(|e| **e == DataStoreEvent::Ready).count();
            let queries_ready = events
                .iter()
                .filter(|e| **e == DataStoreEvent::SyncQueriesReady)
                .count();
            let reported: HashSet<usize> = reports
                .iter()
                .filter(|(_, report)| !matches!(report, Report::Dropped))
                .map(|(index, _)| *index)
                .collect();
            let expect_ready = usize::from(reported.len() == names.len());

            prop_assert_eq!(ready, expect_ready);
            prop_assert_eq!(queries_ready, expect_ready);
            prop_assert_eq!(events, expected_dispatches(&names, &reports));
            if expect_ready == 1 {
                prop_assert_eq!(state, CoordinatorState::Initialized);
            } else {
                prop_assert!(!state.is_final());
            }
        }

        #[test]
        fn exactly_one_initialization_for_any_order(
            (n, order) in (1usize..8).prop_flat_map(|n| {
                (Just(n), prop::collection::vec(0..n + 2, 0..4 * n).prop_map(move |mut extra| {
                    extra.extend(0..n);
                    extra
                }).prop_shuffle())
            })
        ) {
            let mut tracker = ReadinessTracker::new(names(n));
            let mut seen = HashSet::new();
            let mut initializations = 0;

            for index in order {
                let model = format!("Model{index}");
                let outcome = tracker.report(&model);
                if index < n {
                    seen.insert(index);
                }
                if outcome == ReportOutcome::NewlyInitialized {
                    initializations += 1;
                    prop_assert_eq!(seen.len(), n);
                }
                if seen.len() < n {
                    prop_assert!(!tracker.is_initialized());
                }
            }
            prop_assert_eq!(initializations, 1);
        }
    }
}
