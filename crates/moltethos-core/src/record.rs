//! Registration record and its lifecycle (pure domain logic).
//!
//! ```text
//! pending -> registered
//!    |
//!    v
//!  error -> pending (re-admission, retryable kinds only)
//! ```
//!
//! `registered` is terminal. `error` is terminal for a given attempt; whether
//! the record re-enters `pending` is decided by its [`ErrorKind`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::error::ErrorKind;

/// Opaque record identifier assigned by the queue store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const REDACTED: &str = "[redacted]";

/// Secret used to prove identity with the identity provider.
///
/// `Debug` and `Display` never render the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for adapters that must transmit or persist it.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Remove any occurrence of the secret from an operator message.
    #[must_use]
    pub fn scrub(&self, message: &str) -> String {
        if self.is_empty() {
            message.to_string()
        } else {
            message.replace(&self.0, REDACTED)
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Lifecycle status of a record.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Registered,
    Error,
}

/// Error type for invalid record status transitions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid state transition: cannot transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RecordStatus,
    pub to: RecordStatus,
}

impl RecordStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Registered => "registered",
            Self::Error => "error",
        }
    }

    /// Validates that a transition from `self` to `target` is allowed.
    ///
    /// Same-status writes are allowed (bookkeeping updates while pending).
    pub fn validate_transition(&self, target: Self) -> std::result::Result<(), TransitionError> {
        let is_valid = self == &target
            || matches!(
                (self, target),
                (Self::Pending, Self::Registered | Self::Error) | (Self::Error, Self::Pending)
            );

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: target,
            })
        }
    }
}

/// Where a chain agent identifier came from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IdSource {
    /// Parsed from the registration transaction's own event.
    Event,
    /// Read from the registry's global counter; approximate under concurrency.
    Counter,
}

/// Optional metadata supplied at submission time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationMetadata {
    pub requested_name: Option<String>,
    pub agent_type: Option<String>,
    pub webpage_url: Option<String>,
    pub external_agent_ref: Option<String>,
}

impl RegistrationMetadata {
    /// Drop empty strings so "not supplied" has one representation.
    #[must_use]
    pub fn normalized(self) -> Self {
        fn keep(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            requested_name: keep(self.requested_name),
            agent_type: keep(self.agent_type),
            webpage_url: keep(self.webpage_url),
            external_agent_ref: keep(self.external_agent_ref),
        }
    }
}

/// Input for a new record; the store assigns `id` and `created_at`.
#[derive(Debug, Clone)]
pub struct NewRegistration {
    pub credential: Credential,
    pub metadata: RegistrationMetadata,
}

/// The only persistent entity: one registration request.
///
/// Serialization skips the credential, so a serialized record is safe to
/// hand to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRecord {
    pub id: RecordId,
    #[serde(skip)]
    pub credential: Credential,
    #[serde(flatten)]
    pub metadata: RegistrationMetadata,
    pub status: RecordStatus,
    pub resolved_name: Option<String>,
    pub chain_agent_id: Option<String>,
    pub tx_ref: Option<String>,
    pub id_source: Option<IdSource>,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
    pub inflight_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RegistrationRecord {
    /// Build a fresh `pending` record for a store-assigned id.
    #[must_use]
    pub fn pending(id: RecordId, registration: NewRegistration, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            credential: registration.credential,
            metadata: registration.metadata.normalized(),
            status: RecordStatus::Pending,
            resolved_name: None,
            chain_agent_id: None,
            tx_ref: None,
            id_source: None,
            error_message: None,
            error_kind: None,
            attempts: 0,
            inflight_tx: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Whether a pass should pick this record up.
    ///
    /// `pending` records always qualify; `error` records only when their kind
    /// is retryable and the attempt budget is not spent.
    #[must_use]
    pub fn is_processable(&self, max_attempts: u32) -> bool {
        match self.status {
            RecordStatus::Pending => true,
            RecordStatus::Registered => false,
            RecordStatus::Error => {
                self.error_kind.is_some_and(ErrorKind::is_retryable) && self.attempts < max_attempts
            }
        }
    }

    /// Return a retryable `error` record to `pending`.
    pub fn readmitted(&self) -> std::result::Result<Self, TransitionError> {
        self.status.validate_transition(RecordStatus::Pending)?;
        Ok(Self {
            status: RecordStatus::Pending,
            error_message: None,
            error_kind: None,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Count a new processing attempt.
    #[must_use]
    pub fn begin_attempt(&self) -> Self {
        Self {
            attempts: self.attempts.saturating_add(1),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Persistable marker for a submitted, not yet confirmed transaction.
    #[must_use]
    pub fn with_inflight(&self, resolved_name: &str, tx_ref: &str) -> Self {
        Self {
            resolved_name: Some(resolved_name.to_string()),
            inflight_tx: Some(tx_ref.to_string()),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn without_inflight(&self) -> Self {
        Self {
            inflight_tx: None,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Terminal success.
    pub fn registered(
        &self,
        resolved_name: &str,
        chain_agent_id: &str,
        tx_ref: &str,
        id_source: IdSource,
    ) -> std::result::Result<Self, TransitionError> {
        self.status.validate_transition(RecordStatus::Registered)?;
        Ok(Self {
            status: RecordStatus::Registered,
            resolved_name: Some(resolved_name.to_string()),
            chain_agent_id: Some(chain_agent_id.to_string()),
            tx_ref: Some(tx_ref.to_string()),
            id_source: Some(id_source),
            error_message: None,
            error_kind: None,
            inflight_tx: None,
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Failure of the current attempt. The message is scrubbed of the credential.
    pub fn failed(
        &self,
        kind: ErrorKind,
        message: &str,
        resolved_name: Option<&str>,
    ) -> std::result::Result<Self, TransitionError> {
        self.status.validate_transition(RecordStatus::Error)?;
        Ok(Self {
            status: RecordStatus::Error,
            resolved_name: resolved_name
                .map(str::to_string)
                .or_else(|| self.resolved_name.clone()),
            chain_agent_id: None,
            tx_ref: None,
            id_source: None,
            error_message: Some(self.credential.scrub(message)),
            error_kind: Some(kind),
            updated_at: Utc::now(),
            ..self.clone()
        })
    }

    /// Check the "exactly one outcome" invariant.
    ///
    /// Once the record leaves `pending`, exactly one of
    /// {`chain_agent_id` + `tx_ref`, `error_message`} is populated.
    #[must_use]
    pub fn outcome_is_consistent(&self) -> bool {
        let success = self.chain_agent_id.is_some() && self.tx_ref.is_some();
        let failure = self.error_message.is_some();
        match self.status {
            RecordStatus::Pending => !success,
            RecordStatus::Registered => success && !failure,
            RecordStatus::Error => {
                failure && self.chain_agent_id.is_none() && self.tx_ref.is_none()
            }
        }
    }
}
