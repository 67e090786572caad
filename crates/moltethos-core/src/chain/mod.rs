//! Chain Registrar - the on-chain side of a registration.
//!
//! `register` is split into three steps so the pipeline can persist the
//! transaction reference between submission and confirmation:
//!
//! ```text
//! preflight(uri) -> submit(uri) -> tx_ref -> confirm(tx_ref) -> agent id
//! ```

use thiserror::Error;

use crate::{
    error::{ErrorKind, PipelineError},
    record::IdSource,
};

pub mod abi;
pub mod metadata;
pub mod registrar;
pub mod rpc;
pub mod signer;

pub use metadata::AgentCard;
pub use registrar::JsonRpcRegistrar;
pub use signer::LocalSigner;

/// Failure talking to the chain.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// The submitting account cannot cover the fee.
    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    /// The transaction was included and reverted.
    #[error("transaction reverted: {0}")]
    Reverted(String),

    /// No receipt within the configured deadline; the outcome is unknown.
    #[error("timed out waiting for receipt: {0}")]
    Timeout(String),

    /// Transport, node or decoding failure.
    #[error("rpc error: {0}")]
    Rpc(String),
}

impl ChainError {
    /// Whether the transaction is known not to have taken effect.
    #[must_use]
    pub const fn is_definitive(&self) -> bool {
        matches!(self, Self::Reverted(_))
    }
}

impl From<ChainError> for PipelineError {
    fn from(err: ChainError) -> Self {
        let kind = match err {
            ChainError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            ChainError::Reverted(_) | ChainError::Timeout(_) | ChainError::Rpc(_) => {
                ErrorKind::ChainSubmissionFailed
            }
        };
        Self::new(kind, err.to_string())
    }
}

/// Agent identifier read back from an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub agent_id: String,
    pub id_source: IdSource,
}

/// Outcome of a full registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub tx_ref: String,
    pub agent_id: String,
    pub id_source: IdSource,
}

/// Port for the identity registry contract.
#[async_trait::async_trait]
pub trait ChainRegistrar: Send + Sync {
    /// Check that submitting `agent_uri` can be paid for.
    async fn preflight(&self, agent_uri: &str) -> Result<(), ChainError>;

    /// Submit `register(agent_uri)`; returns the transaction reference once
    /// the node has accepted it.
    async fn submit(&self, agent_uri: &str) -> Result<String, ChainError>;

    /// Wait for inclusion and extract the new agent identifier.
    async fn confirm(&self, tx_ref: &str) -> Result<Confirmation, ChainError>;

    /// Preflight, submit and confirm in one call.
    async fn register(&self, agent_uri: &str) -> Result<Registration, ChainError> {
        self.preflight(agent_uri).await?;
        let tx_ref = self.submit(agent_uri).await?;
        let confirmation = self.confirm(&tx_ref).await?;
        Ok(Registration {
            tx_ref,
            agent_id: confirmation.agent_id,
            id_source: confirmation.id_source,
        })
    }
}
