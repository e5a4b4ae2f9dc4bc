//! Reconcile-and-save serial writer.
//!
//! Every model gets its own lane: a task that takes reconciliation units off
//! a channel and applies them one at a time. Units of one model are applied
//! strictly in submission order; lanes of different models run
//! concurrently. Storage work runs on the blocking pool.

use ferrydb_core::{ModelSchema, StorageAdapter, StorageAdapterExt};
use ferrydb_sync_protocol::{DropReason, MutationEvent, MutationSyncResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, Instrument};

/// A batch of remote records for one model.
#[derive(Debug, Clone)]
pub struct ReconciliationUnit {
    /// Schema of the records.
    pub schema: Arc<ModelSchema>,
    /// Records in fetch order.
    pub results: Vec<MutationSyncResult>,
}

/// What happened to one remote record.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconciliationOutcome {
    /// The record was written.
    Applied(MutationEvent),
    /// The record was skipped.
    Dropped {
        /// Model name.
        model_name: String,
        /// Why.
        reason: DropReason,
    },
}

struct Job {
    unit: ReconciliationUnit,
    outcomes: mpsc::UnboundedSender<ReconciliationOutcome>,
}

struct WriterInner {
    storage: Arc<dyn StorageAdapter>,
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
}

/// Applies reconciliation units to local storage, one lane per model.
///
/// Cloning is cheap; clones share the lanes.
#[derive(Clone)]
pub struct ReconcileAndSaveQueue {
    inner: Arc<WriterInner>,
}

impl ReconcileAndSaveQueue {
    /// Creates a writer over `storage`.
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                storage,
                lanes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the storage the writer applies to.
    pub fn storage(&self) -> &Arc<dyn StorageAdapter> {
        &self.inner.storage
    }

    /// Returns the number of model lanes started so far.
    pub fn lane_count(&self) -> usize {
        self.inner.lanes.lock().len()
    }

    /// Queues a unit on its model's lane.
    ///
    /// The returned receiver yields one outcome per record, in record order,
    /// and closes once the unit is done. Dropping the receiver does not stop
    /// the unit. Must be called from within a Tokio runtime.
    pub fn submit(&self, unit: ReconciliationUnit) -> mpsc::UnboundedReceiver<ReconciliationOutcome> {
        let (outcomes, rx) = mpsc::unbounded_channel();
        let model_name = unit.schema.name().to_string();
        let mut job = Job { unit, outcomes };

        let mut lanes = self.inner.lanes.lock();
        if let Some(lane) = lanes.get(&model_name) {
            match lane.send(job) {
                Ok(()) => return rx,
                // The lane task is gone; start a fresh one below.
                Err(mpsc::error::SendError(returned)) => job = returned,
            }
        }

        let lane = self.spawn_lane(&model_name);
        if lane.send(job).is_err() {
            error!(model = %model_name, "writer lane closed before its first unit");
        }
        lanes.insert(model_name, lane);
        rx
    }

    fn spawn_lane(&self, model_name: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let storage = Arc::clone(&self.inner.storage);
        let span = tracing::debug_span!("writer_lane", model = %model_name);

        tokio::spawn(
            async move {
                while let Some(job) = rx.recv().await {
                    let storage = Arc::clone(&storage);
                    let applied = tokio::task::spawn_blocking(move || apply_unit(storage.as_ref(), job));
                    if let Err(err) = applied.await {
                        error!(error = %err, "reconciliation task failed");
                    }
                }
                debug!("writer lane closed");
            }
            .instrument(span),
        );

        tx
    }
}

fn apply_unit(storage: &dyn StorageAdapter, job: Job) {
    let Job { unit, outcomes } = job;
    let mut detached = false;

    for result in &unit.results {
        let outcome = reconcile(storage, result);
        if !detached && outcomes.send(outcome).is_err() {
            debug!(model = %unit.schema.name(), "outcome receiver dropped, finishing unit");
            detached = true;
        }
    }
}

/// Merges one remote record into local storage.
///
/// The record is written only if it is strictly newer than the local copy.
/// Each write is its own transaction, so a failed record leaves the rest of
/// the unit unaffected.
pub(crate) fn reconcile(
    storage: &dyn StorageAdapter,
    result: &MutationSyncResult,
) -> ReconciliationOutcome {
    let model_name = result.model_name();
    let dropped = |reason| ReconciliationOutcome::Dropped {
        model_name: model_name.to_string(),
        reason,
    };

    let local = match storage.current_version(model_name, result.id()) {
        Ok(local) => local,
        Err(err) => return dropped(DropReason::Storage(err.to_string())),
    };

    if let Some(local) = local {
        if result.version() <= local {
            debug!(
                model = model_name,
                id = result.id(),
                local,
                incoming = result.version(),
                "dropping stale record"
            );
            return dropped(DropReason::StaleVersion {
                id: result.id().to_string(),
                local,
                incoming: result.version(),
            });
        }
    }

    let written = storage.transaction(|txn| {
        if result.is_deleted() {
            txn.delete(model_name, result.id(), result.version())
        } else {
            txn.upsert(&result.model, result.version())
        }
    });

    match written {
        Ok(()) => ReconciliationOutcome::Applied(MutationEvent::from_sync_result(
            result,
            local.is_some(),
        )),
        Err(err) => {
            debug!(model = model_name, id = result.id(), error = %err, "dropping record after storage failure");
            dropped(DropReason::Storage(err.to_string()))
        }
    }
}
