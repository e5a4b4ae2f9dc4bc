//! Lifecycle notifications.

use ferrydb_sync_protocol::{DropReason, MutationEvent};
use tokio::sync::broadcast;

/// A lifecycle event surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum DataStoreEvent {
    /// A model finished its startup sync.
    ModelSynced {
        /// Model name.
        model_name: String,
    },
    /// Every model has reported; startup sync queries are done.
    SyncQueriesReady,
    /// The store is ready.
    Ready,
    /// A remote record was written locally.
    MutationApplied(MutationEvent),
    /// A remote record was not written.
    MutationDropped {
        /// Model name.
        model_name: String,
        /// Why it was dropped.
        reason: DropReason,
    },
}

/// Receives lifecycle events.
pub trait LifecycleNotifier: Send + Sync {
    /// Delivers one event. Must not block.
    fn dispatch(&self, event: DataStoreEvent);
}

/// Fans lifecycle events out over a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<DataStoreEvent>,
}

impl BroadcastNotifier {
    /// Creates a notifier buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events dispatched from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DataStoreEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl LifecycleNotifier for BroadcastNotifier {
    fn dispatch(&self, event: DataStoreEvent) {
        // No subscriber is not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_events() {
        let notifier = BroadcastNotifier::new(8);
        let mut rx = notifier.subscribe();

        notifier.dispatch(DataStoreEvent::SyncQueriesReady);
        notifier.dispatch(DataStoreEvent::Ready);

        assert_eq!(rx.recv().await.unwrap(), DataStoreEvent::SyncQueriesReady);
        assert_eq!(rx.recv().await.unwrap(), DataStoreEvent::Ready);
    }

    #[test]
    fn dispatch_without_subscribers() {
        BroadcastNotifier::default().dispatch(DataStoreEvent::Ready);
    }
}
