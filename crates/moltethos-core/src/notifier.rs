//! Status Notifier - per-record change subscriptions.
//!
//! A subscription listens to the store's change feed and hands every
//! snapshot of one record to a callback. Delivery is at-least-once: if the
//! listener falls behind the feed, it re-reads the record from the store
//! rather than skip a terminal transition.

use std::sync::Arc;

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    record::{RecordId, RegistrationRecord},
    store::QueueStore,
};

/// Hands out [`Subscription`]s over a [`QueueStore`]'s change feed.
#[derive(Clone)]
pub struct StatusNotifier {
    store: Arc<dyn QueueStore>,
}

impl StatusNotifier {
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Call `on_change` with the full record each time `record_id` is written.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe<F>(&self, record_id: RecordId, on_change: F) -> Subscription
    where
        F: Fn(RegistrationRecord) + Send + Sync + 'static,
    {
        let mut changes = self.store.changes();
        let store = Arc::clone(&self.store);
        let id = record_id.clone();

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) if change.record.id == id => on_change(change.record),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        tracing::debug!(record_id = %id, missed, "Status subscriber lagged; re-reading record");
                        match store.get(&id).await {
                            Ok(Some(record)) => on_change(record),
                            Ok(None) => {}
                            Err(e) => tracing::warn!(record_id = %id, error = %e, "Failed to re-read record"),
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Subscription { record_id, task }
    }
}

/// Handle for an active subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    record_id: RecordId,
    task: JoinHandle<()>,
}

impl Subscription {
    #[must_use]
    pub const fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Stop delivery. No callback runs after this returns.
    pub async fn unsubscribe(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
