//! # moltethos-core
//!
//! Registration pipeline for the ERC-8004 identity registry.
//!
//! Agents submit a Moltbook credential into a durable queue; a worker
//! validates each credential with the identity provider, registers the agent
//! on-chain and writes the outcome back to the queue record.
//!
//! This crate provides:
//! - The registration record and its lifecycle ([`record`])
//! - Queue store adapters behind one trait ([`store`])
//! - Identity validation ([`validator`]) and chain registration ([`chain`])
//! - The processing pipeline and worker loop ([`pipeline`])
//! - Status subscriptions ([`notifier`])
//! - Feedback ledger and explorer statistics ([`feedback`], [`scan`])
//!
//! ## Error Handling
//!
//! All fallible operations return `Result<T, Error>`. A failed registration
//! attempt is a [`PipelineError`] whose [`ErrorKind`] decides retry policy.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod chain;
pub mod config;
mod error;
pub mod feedback;
pub mod notifier;
pub mod pipeline;
pub mod record;
pub mod scan;
pub mod shutdown;
pub mod store;
pub mod validator;

pub use config::{load_config, Config};
pub use error::{Error, ErrorClass, ErrorKind, PipelineError, Result};
pub use notifier::{StatusNotifier, Subscription};
pub use pipeline::{enqueue, ClaimTracker, PassReport, PipelineOptions, RegistrationPipeline, RunSummary};
pub use record::{
    Credential, IdSource, NewRegistration, RecordId, RecordStatus, RegistrationMetadata,
    RegistrationRecord,
};
pub use store::{open_store, QueueStore};
