//! Storage row for registration records.
//!
//! One flat representation shared by the SQL table and the two REST
//! backends. Timestamps travel as fixed-width RFC 3339 strings (so they sort
//! lexically); enums as their lowercase / snake_case names.
//!
//! Rows written by the web front-end use camelCase keys (`apiKey`,
//! `agentName`, `agentId`, `txHash`) and an epoch-millisecond `timestamp`
//! instead of `created_at`; both shapes deserialize into the same row.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::{
    error::ErrorKind,
    record::{Credential, IdSource, RecordId, RecordStatus, RegistrationMetadata, RegistrationRecord},
    Error, Result,
};

/// A row in the `registrations` table / collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistrationRow {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "string_or_number"
    )]
    pub id: Option<String>,
    #[serde(alias = "apiKey")]
    pub api_key: String,
    pub status: String,
    #[serde(default)]
    pub requested_name: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub external_agent_ref: Option<String>,
    #[serde(default, alias = "agentName")]
    pub agent_name: Option<String>,
    #[serde(default, alias = "agentId", deserialize_with = "string_or_number")]
    pub chain_agent_id: Option<String>,
    #[serde(default, alias = "txHash")]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub id_source: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub attempts: i64,
    #[serde(default)]
    pub inflight_tx: Option<String>,
    #[serde(alias = "timestamp", deserialize_with = "timestamp_text")]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }))
}

/// RFC 3339 text as-is; epoch milliseconds become RFC 3339 text.
fn timestamp_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(millis) => millis
            .as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .map(|at| at.to_rfc3339_opts(SecondsFormat::Micros, true))
            .ok_or_else(|| D::Error::custom(format!("{millis} is not an epoch-millisecond timestamp"))),
        other => Err(D::Error::custom(format!("expected a timestamp, found {other}"))),
    }
}

fn parse_timestamp(id: &str, field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            Error::ParseError(format!("Invalid {field} timestamp '{value}' for record {id}: {e}"))
        })
}

/// Keep the rows that decoded and log the ones that did not.
///
/// Each item pairs a row label (its id or node key) with its decode result.
pub(crate) fn readable_records<I>(rows: I, source: &str) -> Vec<RegistrationRecord>
where
    I: IntoIterator<Item = (String, Result<RegistrationRecord>)>,
{
    rows.into_iter()
        .filter_map(|(label, decoded)| match decoded {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(row = %label, source, error = %e, "Skipping unreadable registration row");
                None
            }
        })
        .collect()
}

impl RegistrationRow {
    #[must_use]
    pub fn from_record(record: &RegistrationRecord) -> Self {
        Self {
            id: Some(record.id.as_str().to_string()),
            api_key: record.credential.expose().to_string(),
            status: record.status.as_str().to_string(),
            requested_name: record.metadata.requested_name.clone(),
            agent_type: record.metadata.agent_type.clone(),
            webpage_url: record.metadata.webpage_url.clone(),
            external_agent_ref: record.metadata.external_agent_ref.clone(),
            agent_name: record.resolved_name.clone(),
            chain_agent_id: record.chain_agent_id.clone(),
            tx_hash: record.tx_ref.clone(),
            id_source: record.id_source.map(|s| s.to_string()),
            error: record.error_message.clone(),
            error_kind: record.error_kind.map(|k| k.to_string()),
            attempts: i64::from(record.attempts),
            inflight_tx: record.inflight_tx.clone(),
            created_at: record.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            updated_at: Some(record.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true)),
        }
    }

    /// Same row without an id, for backends that assign it on insert.
    #[must_use]
    pub fn without_id(mut self) -> Self {
        self.id = None;
        self
    }

    /// Decode a JSON row from a REST backend.
    pub fn decode(value: Value, fallback_id: Option<&str>) -> Result<RegistrationRecord> {
        serde_json::from_value::<Self>(value)?.into_record(fallback_id)
    }

    /// Convert to a domain record, using `fallback_id` when the row carries none
    /// (Firebase keeps the id as the node key).
    ///
    /// On a pending row that was never attempted, `agent_name` was written by
    /// the submitter, so it is read as the requested name. Only a name written
    /// after an attempt started counts as resolved.
    pub fn into_record(self, fallback_id: Option<&str>) -> Result<RegistrationRecord> {
        let id = self
            .id
            .or_else(|| fallback_id.map(str::to_string))
            .ok_or_else(|| Error::ParseError("registration row has no id".to_string()))?;

        let status = RecordStatus::from_str(&self.status).map_err(|_| {
            Error::ParseError(format!("Invalid status '{}' for record {id}", self.status))
        })?;
        let error_kind = self
            .error_kind
            .as_deref()
            .map(|kind| {
                ErrorKind::from_str(kind)
                    .map_err(|_| Error::ParseError(format!("Invalid error kind '{kind}' for record {id}")))
            })
            .transpose()?;
        let id_source = self
            .id_source
            .as_deref()
            .map(|source| {
                IdSource::from_str(source)
                    .map_err(|_| Error::ParseError(format!("Invalid id source '{source}' for record {id}")))
            })
            .transpose()?;

        let created_at = parse_timestamp(&id, "created_at", &self.created_at)?;
        let updated_at = self
            .updated_at
            .as_deref()
            .map(|value| parse_timestamp(&id, "updated_at", value))
            .transpose()?
            .unwrap_or(created_at);

        let submitted = status == RecordStatus::Pending && self.attempts <= 0;
        let (requested_name, resolved_name) = if submitted {
            (self.requested_name.or(self.agent_name), None)
        } else {
            (self.requested_name, self.agent_name)
        };

        Ok(RegistrationRecord {
            id: RecordId::new(id),
            credential: Credential::new(self.api_key),
            metadata: RegistrationMetadata {
                requested_name,
                agent_type: self.agent_type,
                webpage_url: self.webpage_url,
                external_agent_ref: self.external_agent_ref,
            },
            status,
            resolved_name,
            chain_agent_id: self.chain_agent_id,
            tx_ref: self.tx_hash,
            id_source,
            error_message: self.error,
            error_kind,
            attempts: u32::try_from(self.attempts.max(0)).unwrap_or(u32::MAX),
            inflight_tx: self.inflight_tx,
            created_at,
            updated_at,
        })
    }
}
