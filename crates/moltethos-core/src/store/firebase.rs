//! Firebase Realtime Database queue store.
//!
//! Records live under `/<table>/<push-key>`; the push key is the record id.
//! Writes replace the whole node; see [`FirebaseQueueStore::replace_record`].
//!
//! Outside writes arrive over the REST event stream (`Accept:
//! text/event-stream`) while the change feed has subscribers. The stream is
//! reopened after `change_poll` whenever it ends.

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    row::readable_records, ChangeFeed, ChangeKind, ChangePublisher, QueueStore, RecordChange,
    RegistrationRow, DEFAULT_CHANGE_POLL,
};
use crate::{
    config::{Secret, StoreConfig},
    record::{NewRegistration, RecordId, RecordStatus, RegistrationRecord},
    Error, Result,
};

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// `data:` payload of `put` and `patch` stream events.
#[derive(Debug, Deserialize)]
struct StreamPayload {
    path: String,
    #[serde(default)]
    data: Value,
}

/// One server-sent event.
#[derive(Debug, Default, PartialEq, Eq)]
struct ServerEvent {
    name: String,
    data: String,
}

impl ServerEvent {
    fn parse(block: &str) -> Self {
        block.lines().fold(Self::default(), |mut event, line| {
            if let Some(name) = line.strip_prefix("event:") {
                event.name = name.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                if !event.data.is_empty() {
                    event.data.push('\n');
                }
                event.data.push_str(data.trim_start());
            }
            event
        })
    }
}

fn decode_nodes(nodes: serde_json::Map<String, Value>) -> Vec<RegistrationRecord> {
    readable_records(
        nodes.into_iter().map(|(key, node)| {
            let decoded = RegistrationRow::decode(node, Some(key.as_str()));
            (key, decoded)
        }),
        "firebase",
    )
}

/// Realtime Database REST access for one collection.
#[derive(Debug, Clone)]
struct Rtdb {
    client: Client,
    stream: Client,
    base_url: String,
    table: String,
    auth: Option<Secret>,
}

impl Rtdb {
    fn collection_url(&self) -> String {
        format!("{}/{}.json", self.base_url, self.table)
    }

    fn node_url(&self, id: &str) -> String {
        format!("{}/{}/{id}.json", self.base_url, self.table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(token) => request.query(&[("auth", token.expose())]),
            None => request,
        }
    }

    async fn send(request: RequestBuilder, action: &str) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Firebase {action} failed: {e}")))?;
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::StoreUnavailable(format!(
                "Firebase {action} failed with {status}: {body}"
            )))
        }
    }

    /// Decode a collection snapshot (`null` or a key → node map), skipping
    /// nodes that do not decode.
    async fn nodes(response: Response, action: &str) -> Result<Vec<RegistrationRecord>> {
        let nodes = response
            .json::<Option<serde_json::Map<String, Value>>>()
            .await
            .map_err(|e| Error::ParseError(format!("Firebase {action} returned malformed data: {e}")))?
            .unwrap_or_default();
        Ok(decode_nodes(nodes))
    }

    async fn read(&self, id: &str) -> Result<Option<RegistrationRecord>> {
        let request = self.authorized(self.client.get(self.node_url(id)));
        Self::send(request, "read")
            .await?
            .json::<Option<Value>>()
            .await
            .map_err(|e| Error::ParseError(format!("Firebase read returned malformed data: {e}")))?
            .map(|node| RegistrationRow::decode(node, Some(id)))
            .transpose()
    }

    async fn observe_node(&self, key: &str, publisher: &ChangePublisher) {
        match self.read(key).await {
            Ok(Some(record)) => publisher.observe(&record),
            Ok(None) => {}
            Err(e) => tracing::warn!(row = key, error = %e, "Skipping unreadable registration node"),
        }
    }

    /// Follow the collection's event stream until it closes.
    async fn follow(&self, publisher: &ChangePublisher) -> Result<()> {
        let request = self
            .authorized(self.stream.get(self.collection_url()))
            .header(header::ACCEPT, "text/event-stream");
        let mut body = Self::send(request, "stream").await?.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut primed = false;

        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::StoreUnavailable(format!("Firebase stream interrupted: {e}")))?;
            buffer.extend_from_slice(&chunk);
            while let Some(end) = buffer.windows(2).position(|pair| pair == b"\n\n") {
                let block: Vec<u8> = buffer.drain(..end + 2).collect();
                let event = ServerEvent::parse(&String::from_utf8_lossy(&block));
                self.apply(event, publisher, &mut primed).await?;
            }
        }
        Ok(())
    }

    async fn apply(
        &self,
        event: ServerEvent,
        publisher: &ChangePublisher,
        primed: &mut bool,
    ) -> Result<()> {
        match event.name.as_str() {
            "put" | "patch" => {
                let payload: StreamPayload = serde_json::from_str(&event.data)?;
                let key = payload
                    .path
                    .trim_start_matches('/')
                    .split('/')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                match (key.is_empty(), payload.data) {
                    (true, Value::Object(nodes)) if event.name == "put" => {
                        let records = decode_nodes(nodes);
                        if *primed {
                            records.iter().for_each(|record| publisher.observe(record));
                        } else {
                            publisher.prime(&records);
                        }
                    }
                    (true, Value::Object(children)) => {
                        for child in children.keys() {
                            self.observe_node(child, publisher).await;
                        }
                    }
                    (true, _) => {}
                    (false, _) => self.observe_node(&key, publisher).await,
                }
                *primed = true;
                Ok(())
            }
            "cancel" | "auth_revoked" => Err(Error::StoreUnavailable(format!(
                "Firebase stream ended by server: {}",
                event.name
            ))),
            _ => Ok(()),
        }
    }
}

async fn stream_changes(api: Rtdb, publisher: ChangePublisher, retry: Duration) {
    loop {
        if publisher.has_subscribers() {
            match api.follow(&publisher).await {
                Ok(()) => tracing::debug!("Firebase event stream closed; reconnecting"),
                Err(e) => tracing::warn!(error = %e, "Firebase event stream failed; reconnecting"),
            }
        }
        tokio::time::sleep(retry).await;
    }
}

fn watched_feed(api: Rtdb, retry: Duration) -> ChangeFeed {
    ChangeFeed::watched(move |publisher| Box::pin(stream_changes(api, publisher, retry)))
}

/// [`QueueStore`] over the Realtime Database REST API.
#[derive(Debug, Clone)]
pub struct FirebaseQueueStore {
    api: Rtdb,
    feed: ChangeFeed,
}

impl FirebaseQueueStore {
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` when the database URL is missing.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let url = config
            .firebase_url
            .as_deref()
            .ok_or_else(|| Error::InvalidConfig("store.firebase_url is not set".to_string()))?;
        Ok(Self::new(
            url,
            config.firebase_auth.clone(),
            &config.table,
            Duration::from_secs(config.request_timeout_secs),
        )?
        .with_change_poll(config.change_poll()))
    }

    pub fn new(
        database_url: &str,
        auth: Option<Secret>,
        table: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let build_failed =
            |e: reqwest::Error| Error::StoreUnavailable(format!("Failed to build HTTP client: {e}"));
        let client = Client::builder().timeout(timeout).build().map_err(build_failed)?;
        let stream = Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(build_failed)?;
        let api = Rtdb {
            client,
            stream,
            base_url: database_url.trim_end_matches('/').to_string(),
            table: table.to_string(),
            auth,
        };
        Ok(Self {
            feed: watched_feed(api.clone(), DEFAULT_CHANGE_POLL),
            api,
        })
    }

    /// Wait `retry` before reopening a closed event stream. Call before the
    /// first subscription.
    #[must_use]
    pub fn with_change_poll(mut self, retry: Duration) -> Self {
        self.feed = watched_feed(self.api.clone(), retry);
        self
    }

    /// Whole-node replace under the existing key.
    ///
    /// The Realtime Database keeps no partial-update path for this schema, so
    /// every status change rewrites the full record.
    async fn replace_record(&self, id: &RecordId, record: &RegistrationRecord) -> Result<()> {
        let row = RegistrationRow::from_record(record).without_id();
        let request = self
            .api
            .authorized(self.api.client.put(self.api.node_url(id.as_str())))
            .json(&row);
        Rtdb::send(request, "replace").await.map(|_| ())
    }

    async fn query(&self, query: &[(&str, &str)], action: &str) -> Result<Vec<RegistrationRecord>> {
        let request = self
            .api
            .authorized(self.api.client.get(self.api.collection_url()))
            .query(query);
        Rtdb::nodes(Rtdb::send(request, action).await?, action).await
    }
}

#[async_trait::async_trait]
impl QueueStore for FirebaseQueueStore {
    async fn insert(&self, registration: NewRegistration) -> Result<RegistrationRecord> {
        let draft = RegistrationRecord::pending(RecordId::new(""), registration, Utc::now());
        let row = RegistrationRow::from_record(&draft).without_id();

        let request = self
            .api
            .authorized(self.api.client.post(self.api.collection_url()))
            .json(&row);
        let pushed = Rtdb::send(request, "insert")
            .await?
            .json::<PushResponse>()
            .await
            .map_err(|e| Error::ParseError(format!("Firebase insert returned no key: {e}")))?;

        let record = RegistrationRecord {
            id: RecordId::new(pushed.name),
            ..draft
        };
        tracing::debug!(record_id = %record.id, "Inserted pending registration");
        self.feed.publish(ChangeKind::Inserted, &record);
        Ok(record)
    }

    async fn get(&self, id: &RecordId) -> Result<Option<RegistrationRecord>> {
        self.api.read(id.as_str()).await
    }

    async fn list_by_status(&self, status: RecordStatus) -> Result<Vec<RegistrationRecord>> {
        let equal_to = format!("\"{status}\"");
        let mut records = self
            .query(&[("orderBy", "\"status\""), ("equalTo", equal_to.as_str())], "list")
            .await?;
        // Filtered queries come back as an unordered map.
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn list_all(&self) -> Result<Vec<RegistrationRecord>> {
        let mut records = self.query(&[], "list").await?;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn update(&self, record: &RegistrationRecord) -> Result<()> {
        self.replace_record(&record.id, record).await?;
        self.feed.publish(ChangeKind::Updated, record);
        Ok(())
    }

    fn changes(&self) -> broadcast::Receiver<RecordChange> {
        self.feed.subscribe()
    }
}
