//! Supabase (PostgREST) queue store.
//!
//! Writes from the web front-end or another worker are picked up by polling
//! the table while the change feed has subscribers.

use std::time::Duration;

use chrono::Utc;
use reqwest::{header, Client, RequestBuilder, Response};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    poll_backend, row::readable_records, ChangeFeed, ChangeKind, QueueStore, RecordChange,
    RegistrationRow, DEFAULT_CHANGE_POLL,
};
use crate::{
    config::{Secret, StoreConfig},
    record::{NewRegistration, RecordId, RecordStatus, RegistrationRecord},
    Error, Result,
};

/// Authenticated access to one PostgREST table.
#[derive(Debug, Clone)]
struct Postgrest {
    client: Client,
    endpoint: String,
    key: Secret,
}

impl Postgrest {
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", self.key.expose())
            .bearer_auth(self.key.expose())
    }

    async fn rows(response: Response, action: &str) -> Result<Vec<Value>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::StoreUnavailable(format!(
                "Supabase {action} failed with {status}: {body}"
            )));
        }
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| Error::ParseError(format!("Supabase {action} returned malformed rows: {e}")))
    }

    async fn select_rows(&self, query: &[(&str, &str)], action: &str) -> Result<Vec<Value>> {
        let response = self
            .authorized(self.client.get(&self.endpoint))
            .query(&[("select", "*")])
            .query(query)
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Supabase {action} failed: {e}")))?;
        Self::rows(response, action).await
    }

    /// Rows matching `query`; rows that do not decode are logged and skipped.
    async fn select(&self, query: &[(&str, &str)], action: &str) -> Result<Vec<RegistrationRecord>> {
        let rows = self.select_rows(query, action).await?;
        Ok(readable_records(
            rows.into_iter().map(|row| {
                let label = row_label(&row);
                (label, RegistrationRow::decode(row, None))
            }),
            "supabase",
        ))
    }
}

fn row_label(row: &Value) -> String {
    match &row["id"] {
        Value::String(id) => id.clone(),
        Value::Null => "<no id>".to_string(),
        other => other.to_string(),
    }
}

fn watched_feed(api: Postgrest, interval: Duration) -> ChangeFeed {
    ChangeFeed::watched(move |publisher| {
        Box::pin(poll_backend(publisher, interval, move || {
            let api = api.clone();
            async move { api.select(&[("order", "created_at.asc")], "watch").await }
        }))
    })
}

/// [`QueueStore`] over the PostgREST API of a Supabase project.
#[derive(Debug, Clone)]
pub struct SupabaseQueueStore {
    api: Postgrest,
    feed: ChangeFeed,
}

impl SupabaseQueueStore {
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the project URL or key is missing.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let url = config
            .supabase_url
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("store.supabase_url is not set".to_string()))?;
        let key = config
            .supabase_key
            .clone()
            .ok_or_else(|| Error::InvalidConfig("Supabase key is not set".to_string()))?;
        Ok(Self::new(
            url,
            key,
            &config.table,
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_change_poll(config.change_poll()))
    }

    pub fn new(project_url: &str, key: Secret, table: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::StoreUnavailable(format!("Failed to build HTTP client: {e}")))?;
        let api = Postgrest {
            client,
            endpoint: format!("{}/rest/v1/{table}", project_url.trim_end_matches('/')),
            key,
        };
        Ok(Self {
            feed: watched_feed(api.clone(), DEFAULT_CHANGE_POLL),
            api,
        })
    }

    /// Use `interval` when polling for outside writes. Call before the first
    /// subscription.
    #[must_use]
    pub fn with_change_poll(mut self, interval: Duration) -> Self {
        self.feed = watched_feed(self.api.clone(), interval);
        self
    }
}

#[async_trait::async_trait]
impl QueueStore for SupabaseQueueStore {
    async fn insert(&self, registration: NewRegistration) -> Result<RegistrationRecord> {
        let draft = RegistrationRecord::pending(RecordId::new(""), registration, Utc::now());
        let row = RegistrationRow::from_record(&draft).without_id();

        let response = self
            .api
            .authorized(self.api.client.post(&self.api.endpoint))
            .header("Prefer", "return=representation")
            .header(header::CONTENT_TYPE, "application/json")
            .json(&[row])
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Supabase insert failed: {e}")))?;

        let inserted = Postgrest::rows(response, "insert")
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::StoreUnavailable("Supabase insert returned no row".to_string()))?;
        let record = RegistrationRow::decode(inserted, None)?;

        tracing::debug!(record_id = %record.id, "Inserted pending registration");
        self.feed.publish(ChangeKind::Inserted, &record);
        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<RegistrationRecord>> {
        let filter = format!("eq.{id}");
        self.api
            .select_rows(&[("id", filter.as_str())], "read")
            .await?
            .into_iter()
            .next()
            .map(|row| RegistrationRow::decode(row, None))
            .transpose()
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<RegistrationRecord>> {
        let filter = format!("eq.{status}");
        self.api
            .select(
                &[("status", filter.as_str()), ("order", "created_at.asc")],
                "list",
            )
            .await
    }

    async fn list_all(&self) -> Result<Vec<RegistrationRecord>> {
        self.api.select(&[("order", "created_at.desc")], "list").await
    }

    async fn update(&self, record: &RegistrationRecord) -> Result<()> {
        let row = RegistrationRow::from_record(record).without_id();
        let filter = format!("eq.{}", record.id);

        let response = self
            .api
            .authorized(self.api.client.patch(&self.api.endpoint))
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Supabase update failed: {e}")))?;

        if Postgrest::rows(response, "update").await?.is_empty() {
            return Err(Error::NotFound(format!("registration {}", record.id)));
        }

        self.feed.publish(ChangeKind::Updated, record);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}
