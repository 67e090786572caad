//! Queue Store - abstraction boundary for registration persistence.
//!
//! The pipeline only ever talks to [`QueueStore`]. Backend quirks (such as
//! Firebase's whole-node replace) stay inside the adapters.
//!
//! Every adapter publishes a [`RecordChange`] for each write made through it
//! and, once someone subscribes, watches its backend for writes made by other
//! processes: `SQLite` and Supabase by polling, Firebase through its
//! event stream. The [`StatusNotifier`](crate::notifier::StatusNotifier) and
//! the worker loop subscribe to that feed.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    config::{Config, StoreBackend},
    record::{NewRegistration, RecordId, RecordStatus, RegistrationRecord},
    Result,
};

pub mod firebase;
pub mod row;
pub mod sqlite;
pub mod supabase;

pub use firebase::FirebaseQueueStore;
pub use row::RegistrationRow;
pub use sqlite::SqliteQueueStore;
pub use supabase::SupabaseQueueStore;

/// Capacity of each store's change channel.
const CHANGE_FEED_CAPACITY: usize = 256;

/// Interval between backend reads when watching for outside writes.
pub const DEFAULT_CHANGE_POLL: Duration = Duration::from_secs(1);

/// What happened to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
}

/// A full snapshot of a record after a write.
#[derive(Debug, Clone)]
pub struct RecordChange {
    pub kind: ChangeKind,
    pub record: RegistrationRecord,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sending half of a feed, shared by a store and its backend watcher.
///
/// Remembers the last row published per record so a write seen twice (once
/// locally, once read back from the backend) is announced once.
#[derive(Debug, Clone)]
pub(crate) struct ChangePublisher {
    tx: broadcast::Sender<RecordChange>,
    known: Arc<Mutex<HashMap<RecordId, RegistrationRow>>>,
}

impl ChangePublisher {
    fn send(&self, kind: ChangeKind, record: &RegistrationRecord) {
        let _ = self.tx.send(RecordChange {
            kind,
            record: record.clone(),
        });
    }

    /// Publish a write made through this process.
    pub(crate) fn publish(&self, kind: ChangeKind, record: &RegistrationRecord) {
        lock(&self.known).insert(record.id.clone(), RegistrationRow::from_record(record));
        self.send(kind, record);
    }

    /// Publish `record` as read from the backend, if it differs from what was
    /// last published for its id.
    pub(crate) fn observe(&self, record: &RegistrationRecord) {
        let row = RegistrationRow::from_record(record);
        let kind = match lock(&self.known).insert(record.id.clone(), row.clone()) {
            None => Some(ChangeKind::Inserted),
            Some(previous) if previous != row => Some(ChangeKind::Updated),
            Some(_) => None,
        };
        if let Some(kind) = kind {
            self.send(kind, record);
        }
    }

    /// Take a backend snapshot as the baseline. Records already known are
    /// compared as usual; unknown ones are recorded without a notification.
    pub(crate) fn prime(&self, records: &[RegistrationRecord]) {
        for record in records {
            let known = lock(&self.known).contains_key(&record.id);
            if known {
                self.observe(record);
            } else {
                lock(&self.known).insert(record.id.clone(), RegistrationRow::from_record(record));
            }
        }
    }

    pub(crate) fn has_subscribers(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

type WatchTask = Box<dyn FnOnce(ChangePublisher) -> BoxFuture<'static, ()> + Send>;

/// Backend watcher, started by the first subscription and aborted when the
/// last handle on the feed goes away.
#[derive(Default)]
struct Watcher {
    task: Mutex<Option<WatchTask>>,
    running: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let running = self
            .running
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = running.take() {
            handle.abort();
        }
    }
}

/// Broadcast side of a store's change notifications.
#[derive(Clone)]
pub struct ChangeFeed {
    publisher: ChangePublisher,
    watcher: Arc<Watcher>,
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.publisher.tx.receiver_count())
            .finish_non_exhaustive()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeFeed {
    /// A feed carrying only writes made through its own store.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            publisher: ChangePublisher {
                tx,
                known: Arc::default(),
            },
            watcher: Arc::default(),
        }
    }

    /// A feed that also runs `watch` against the backend once subscribed.
    pub(crate) fn watched<W>(watch: W) -> Self
    where
        W: FnOnce(ChangePublisher) -> BoxFuture<'static, ()> + Send + 'static,
    {
        let feed = Self::new();
        *lock(&feed.watcher.task) = Some(Box::new(watch));
        feed
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, kind: ChangeKind, record: &RegistrationRecord) {
        self.publisher.publish(kind, record);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RecordChange> {
        let rx = self.publisher.tx.subscribe();
        self.start_watcher();
        rx
    }

    fn start_watcher(&self) {
        let mut task = lock(&self.watcher.task);
        if task.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No runtime yet; backend watcher starts on a later subscription");
            return;
        };
        if let Some(watch) = task.take() {
            let handle = runtime.spawn(watch(self.publisher.clone()));
            *lock(&self.watcher.running) = Some(handle);
        }
    }
}

/// Poll `fetch` every `interval` while the feed has subscribers and publish
/// whatever changed since the previous read.
pub(crate) async fn poll_backend<F, Fut>(publisher: ChangePublisher, interval: Duration, fetch: F)
where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = Result<Vec<RegistrationRecord>>> + Send,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut primed = false;

    loop {
        ticker.tick().await;
        if !publisher.has_subscribers() {
            primed = false;
            continue;
        }
        match fetch().await {
            Ok(records) if primed => records.iter().for_each(|record| publisher.observe(record)),
            Ok(records) => {
                publisher.prime(&records);
                primed = true;
            }
            Err(e) => tracing::debug!(error = %e, "Change poll failed"),
        }
    }
}

/// Trait defining the persistence boundary for registration records.
///
/// # Error Handling
///
/// Transport and backend failures surface as
/// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable).
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new `pending` record and return it with its assigned id.
    async fn insert(&self, registration: NewRegistration) -> Result<RegistrationRecord>;

    /// Fetch a record by id.
    async fn get(&self, id: &RecordId) -> Result<Option<RegistrationRecord>>;

    /// All records with the given status, oldest first.
    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<RegistrationRecord>>;

    /// All records, newest first.
    async fn list_all(&self) -> Result<Vec<RegistrationRecord>>;

    /// Write the whole record keyed by `record.id`.
    ///
    /// `SQLite` and Firebase insert the row if it is missing; Supabase
    /// returns `Error::NotFound`.
    async fn update(&self, record: &RegistrationRecord) -> Result<()>;

    /// Subscribe to record changes, whether written through this store or
    /// by another process sharing the backend.
    fn changes(&self) -> broadcast::Receiver<RecordChange>;

    /// Records a processing pass should consider: every `pending` record plus
    /// retryable `error` records with attempts left.
    async fn list_processable(&self, max_attempts: u32) -> Result<Vec<RegistrationRecord>> {
        let mut records = self.list_by_status(RecordStatus::Pending).await?;
        let retryable = self
            .list_by_status(RecordStatus::Error)
            .await?
            .into_iter()
            .filter(|record| record.is_processable(max_attempts));
        records.extend(retryable);
        Ok(records)
    }
}

/// Build the configured store backend.
pub async fn open_store(config: &Config) -> Result<Arc<dyn QueueStore>> {
    let store: Arc<dyn QueueStore> = match config.store.backend {
        StoreBackend::Sqlite => Arc::new(
            SqliteQueueStore::open(&config.store.sqlite_path)
                .await?
                .with_change_poll(config.store.change_poll()),
        ),
        StoreBackend::Supabase => Arc::new(SupabaseQueueStore::from_config(&config.store)?),
        StoreBackend::Firebase => Arc::new(FirebaseQueueStore::from_config(&config.store)?),
    };
    tracing::debug!(backend = %config.store.backend, "Opened queue store");
    Ok(store)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::record::{Credential, RegistrationMetadata};

    fn record(id: &str) -> RegistrationRecord {
        RegistrationRecord::pending(
            RecordId::new(id),
            NewRegistration {
                credential: Credential::new("key"),
                metadata: RegistrationMetadata::default(),
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_observed_rows_are_announced_once() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();
        let publisher = feed.publisher.clone();

        let first = record("1");
        feed.publish(ChangeKind::Inserted, &first);
        publisher.observe(&first);
        let second = record("2");
        publisher.observe(&second);
        publisher.observe(&second);

        assert_eq!(rx.recv().await.unwrap().record.id, first.id);
        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Inserted);
        assert_eq!(change.record.id, second.id);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_priming_only_reports_known_records() {
        let feed = ChangeFeed::new();
        let mut rx = feed.subscribe();
        let publisher = feed.publisher.clone();

        let tracked = record("1");
        feed.publish(ChangeKind::Inserted, &tracked);
        let _ = rx.recv().await.unwrap();

        let moved_on = tracked.begin_attempt();
        publisher.prime(&[moved_on, record("2")]);

        let change = rx.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::Updated);
        assert_eq!(change.record.attempts, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watcher_starts_on_first_subscription() {
        let feed = ChangeFeed::watched(|publisher| {
            Box::pin(async move {
                publisher.observe(&record("outside"));
            })
        });
        let mut rx = feed.subscribe();
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.record.id.as_str(), "outside");
    }
}
