//! Local `SQLite` queue store.
//!
//! Embedded schema, no migration files. The pool is shared with the
//! [`FeedbackLedger`](crate::feedback::FeedbackLedger) when both live in the
//! same database.
//!
//! Other processes may write the same file, so once the feed has a
//! subscriber the table is re-read every `change_poll` interval.

use std::{path::Path, time::Duration};

use chrono::Utc;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tokio::sync::broadcast;

use super::{
    poll_backend, row::readable_records, ChangeFeed, ChangeKind, QueueStore, RecordChange,
    RegistrationRow, DEFAULT_CHANGE_POLL,
};
use crate::{
    record::{NewRegistration, RecordId, RecordStatus, RegistrationRecord},
    Error, Result,
};

pub(crate) const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS registrations (
    id TEXT PRIMARY KEY,
    api_key TEXT NOT NULL,
    status TEXT NOT NULL CHECK(status IN ('pending', 'registered', 'error')),
    requested_name TEXT,
    agent_type TEXT,
    webpage_url TEXT,
    external_agent_ref TEXT,
    agent_name TEXT,
    chain_agent_id TEXT,
    tx_hash TEXT,
    id_source TEXT,
    error TEXT,
    error_kind TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    inflight_tx TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_registrations_status ON registrations(status);
";

const SELECT_COLUMNS: &str = "SELECT id, api_key, status, requested_name, agent_type, webpage_url, \
     external_agent_ref, agent_name, chain_agent_id, tx_hash, id_source, error, error_kind, \
     attempts, inflight_tx, created_at, updated_at FROM registrations";

/// `SQLite`-backed [`QueueStore`].
#[derive(Debug, Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl SqliteQueueStore {
    /// Open or create a database file.
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreUnavailable` if the file cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .min_connections(1)
            .connect(&url)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to connect to database: {e}")))?;
        Self::with_pool(pool).await
    }

    /// Private in-memory database, kept alive on a single connection.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to open in-memory database: {e}")))?;
        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, creating the schema if needed.
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to initialize schema: {e}")))?;
        Ok(Self {
            feed: watched_feed(pool.clone(), DEFAULT_CHANGE_POLL),
            pool,
        })
    }

    /// Use `interval` when polling for writes from other processes. Call
    /// before the first subscription.
    #[must_use]
    pub fn with_change_poll(mut self, interval: Duration) -> Self {
        self.feed = watched_feed(self.pool.clone(), interval);
        self
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_rows(&self, sql: &str, status: Option<&str>) -> Result<Vec<RegistrationRecord>> {
        select_rows(&self.pool, sql, status).await
    }
}

fn watched_feed(pool: SqlitePool, interval: Duration) -> ChangeFeed {
    ChangeFeed::watched(move |publisher| {
        Box::pin(poll_backend(publisher, interval, move || {
            let pool = pool.clone();
            async move { select_rows(&pool, SELECT_COLUMNS, None).await }
        }))
    })
}

async fn select_rows(
    pool: &SqlitePool,
    sql: &str,
    status: Option<&str>,
) -> Result<Vec<RegistrationRecord>> {
    let query = sqlx::query_as::<_, RegistrationRow>(sql);
    let query = match status {
        Some(status) => query.bind(status.to_string()),
        None => query,
    };
    let rows = query
        .fetch_all(pool)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("Failed to list registrations: {e}")))?;
    Ok(readable_records(
        rows.into_iter()
            .map(|row| (row.id.clone().unwrap_or_default(), row.into_record(None))),
        "sqlite",
    ))
}

#[async_trait::async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, registration: NewRegistration) -> Result<RegistrationRecord> {
        let id = RecordId::new(uuid::Uuid::new_v4().to_string());
        let record = RegistrationRecord::pending(id, registration, Utc::now());
        let row = RegistrationRow::from_record(&record);

        sqlx::query(
            "INSERT INTO registrations (id, api_key, status, requested_name, agent_type, \
             webpage_url, external_agent_ref, attempts, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.id)
        .bind(&row.api_key)
        .bind(&row.status)
        .bind(&row.requested_name)
        .bind(&row.agent_type)
        .bind(&row.webpage_url)
        .bind(&row.external_agent_ref)
        .bind(row.attempts)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("Failed to insert registration: {e}")))?;

        tracing::debug!(record_id = %record.id, "Inserted pending registration");
        self.feed.publish(ChangeKind::Inserted, &record);
        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<RegistrationRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE id = ?");
        sqlx::query_as::<_, RegistrationRow>(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read registration {id}: {e}")))?
            .map(|row| row.into_record(None))
            .transpose()
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<RegistrationRecord>> {
        let sql = format!("{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at ASC");
        self.fetch_rows(&sql, Some(status.as_str())).await
    }

    async fn list_all(&self) -> Result<Vec<RegistrationRecord>> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY created_at DESC");
        self.fetch_rows(&sql, None).await
    }

    async fn update(&self, record: &RegistrationRecord) -> Result<()> {
        let row = RegistrationRow::from_record(record);
        sqlx::query(
            "INSERT INTO registrations (id, api_key, status, requested_name, agent_type, \
             webpage_url, external_agent_ref, agent_name, chain_agent_id, tx_hash, id_source, \
             error, error_kind, attempts, inflight_tx, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             api_key = excluded.api_key, status = excluded.status, \
             requested_name = excluded.requested_name, agent_type = excluded.agent_type, \
             webpage_url = excluded.webpage_url, external_agent_ref = excluded.external_agent_ref, \
             agent_name = excluded.agent_name, chain_agent_id = excluded.chain_agent_id, \
             tx_hash = excluded.tx_hash, id_source = excluded.id_source, error = excluded.error, \
             error_kind = excluded.error_kind, attempts = excluded.attempts, \
             inflight_tx = excluded.inflight_tx, updated_at = excluded.updated_at",
        )
        .bind(&row.id)
        .bind(&row.api_key)
        .bind(&row.status)
        .bind(&row.requested_name)
        .bind(&row.agent_type)
        .bind(&row.webpage_url)
        .bind(&row.external_agent_ref)
        .bind(&row.agent_name)
        .bind(&row.chain_agent_id)
        .bind(&row.tx_hash)
        .bind(&row.id_source)
        .bind(&row.error)
        .bind(&row.error_kind)
        .bind(row.attempts)
        .bind(&row.inflight_tx)
        .bind(&row.created_at)
        .bind(&row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::StoreUnavailable(format!("Failed to update registration {}: {e}", record.id))
        })?;

        self.feed.publish(ChangeKind::Updated, record);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}
