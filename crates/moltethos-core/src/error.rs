//! Error types for moltethos-core
//!
//! Two layers:
//! - [`Error`]: adapter and configuration failures (store, HTTP, parsing).
//! - [`PipelineError`]: a classified failure of one processing attempt,
//!   carrying the [`ErrorKind`] that drives retry policy.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

/// Classification of failures for retry decision-making.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Error is transient and the record may be processed again.
    Retryable,
    /// Error is permanent; a new submission is required.
    Terminal,
}

/// Kind of a failed registration attempt.
///
/// Persisted next to the error message so that re-admission is decided by
/// kind, never by the `error` status alone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The identity provider rejected the credential.
    InvalidCredential,
    /// The identity provider could not be reached.
    ProviderUnavailable,
    /// The submitting account cannot pay the transaction fee.
    InsufficientFunds,
    /// Submission, inclusion or receipt handling failed.
    ChainSubmissionFailed,
    /// The queue store rejected or could not persist a write.
    StoreUnavailable,
}

impl ErrorKind {
    #[must_use]
    pub const fn classify(self) -> ErrorClass {
        match self {
            Self::InvalidCredential => ErrorClass::Terminal,
            Self::ProviderUnavailable
            | Self::InsufficientFunds
            | Self::ChainSubmissionFailed
            | Self::StoreUnavailable => ErrorClass::Retryable,
        }
    }

    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self.classify(), ErrorClass::Retryable)
    }
}

/// Core error type for adapter, store and configuration operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The queue store could not be reached or rejected the operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration value
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Malformed data from a store or remote service
    #[error("parse error: {0}")]
    ParseError(String),

    /// Invalid state transition or broken record invariant
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Rejected input
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(String),

    /// HTTP transport failure outside of the store adapters
    #[error("http error: {0}")]
    Http(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::ParseError(format!("Failed to parse config: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

/// Result type alias for moltethos-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// A classified failure of a single registration attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct PipelineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl PipelineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<Error> for PipelineError {
    fn from(err: Error) -> Self {
        Self::new(ErrorKind::StoreUnavailable, err.to_string())
    }
}
