//! Registration Pipeline - drives queue records to a terminal state.
//!
//! # Flow per record
//!
//! ```text
//! claim -> re-read -> (re-admit) -> count attempt -> resolve name
//!       -> build agent card -> preflight -> submit -> persist in-flight tx
//!       -> confirm -> commit `registered`       (or write `error` + kind)
//!       -> release claim
//! ```
//!
//! The claimed set is process-local. Running several pipelines against one
//! store can register the same record twice; deploy a single worker.

use std::{collections::HashSet, sync::Arc, time::Duration};

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::{
    broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
    Mutex,
};

use crate::{
    chain::{AgentCard, ChainRegistrar},
    config::WorkerConfig,
    error::{ErrorKind, PipelineError},
    record::{Credential, NewRegistration, RecordId, RecordStatus, RegistrationMetadata, RegistrationRecord},
    shutdown::ShutdownSignal,
    store::{ChangeKind, QueueStore},
    validator::IdentityValidator,
    Error, Result,
};

// ═══════════════════════════════════════════════════════════════════════════
// CLAIMS
// ═══════════════════════════════════════════════════════════════════════════

/// Records currently being processed by this pipeline instance.
#[derive(Debug, Clone, Default)]
pub struct ClaimTracker {
    claims: Arc<Mutex<HashSet<RecordId>>>,
}

impl ClaimTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-claim in one step. Returns `false` if already claimed.
    pub async fn try_claim(&self, id: &RecordId) -> bool {
        self.claims.lock().await.insert(id.clone())
    }

    /// Remove a claim. Returns whether it was held.
    pub async fn release(&self, id: &RecordId) -> bool {
        self.claims.lock().await.remove(id)
    }

    pub async fn is_claimed(&self, id: &RecordId) -> bool {
        self.claims.lock().await.contains(id)
    }

    pub async fn count(&self) -> usize {
        self.claims.lock().await.len()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// OPTIONS AND REPORTS
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Attempts allowed before a retryable failure is left in `error`.
    pub max_attempts: u32,
    /// Records processed at once within a pass; 1 means sequential.
    pub concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for PipelineOptions {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            concurrency: config.concurrency.max(1),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Counts for one processing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub registered: usize,
    pub failed_retryable: usize,
    pub failed_terminal: usize,
    /// Records another invocation held, or that were no longer processable.
    pub skipped: usize,
    /// Retryable `error` records written back to `pending` this pass.
    pub readmitted: usize,
}

impl PassReport {
    pub fn merge(&mut self, other: Self) {
        self.registered += other.registered;
        self.failed_retryable += other.failed_retryable;
        self.failed_terminal += other.failed_terminal;
        self.skipped += other.skipped;
        self.readmitted += other.readmitted;
    }

    /// Records that reached a new outcome this pass.
    #[must_use]
    pub const fn attempted(&self) -> usize {
        self.registered + self.failed_retryable + self.failed_terminal
    }

    fn skipped() -> Self {
        Self {
            skipped: 1,
            ..Self::default()
        }
    }
}

/// Totals for a `run` invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passes: usize,
    pub failed_passes: usize,
    pub totals: PassReport,
}

// ═══════════════════════════════════════════════════════════════════════════
// PIPELINE
// ═══════════════════════════════════════════════════════════════════════════

/// Insert a `pending` record without building a pipeline.
///
/// # Errors
///
/// `Error::Validation` for an empty credential; `Error::StoreUnavailable`
/// if the record cannot be persisted.
pub async fn enqueue(
    store: &dyn QueueStore,
    credential: Credential,
    metadata: RegistrationMetadata,
) -> Result<RecordId> {
    if credential.is_empty() {
        return Err(Error::Validation("credential cannot be empty".to_string()));
    }
    let record = store
        .insert(NewRegistration {
            credential,
            metadata,
        })
        .await?;
    tracing::info!(record_id = %record.id, "Registration queued");
    Ok(record.id)
}

/// Why a pass was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Timer,
    Push,
}

pub struct RegistrationPipeline {
    store: Arc<dyn QueueStore>,
    validator: Arc<dyn IdentityValidator>,
    registrar: Arc<dyn ChainRegistrar>,
    claims: ClaimTracker,
    options: PipelineOptions,
}

impl RegistrationPipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn QueueStore>,
        validator: Arc<dyn IdentityValidator>,
        registrar: Arc<dyn ChainRegistrar>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store,
            validator,
            registrar,
            claims: ClaimTracker::new(),
            options,
        }
    }

    #[must_use]
    pub const fn claims(&self) -> &ClaimTracker {
        &self.claims
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Queue a new registration. Does not validate or touch the chain.
    ///
    /// # Errors
    ///
    /// See [`enqueue`].
    pub async fn submit(
        &self,
        credential: Credential,
        metadata: RegistrationMetadata,
    ) -> Result<RecordId> {
        enqueue(self.store.as_ref(), credential, metadata).await
    }

    /// One pass over every processable record.
    ///
    /// # Errors
    ///
    /// Returns `Error::StoreUnavailable` if the processable records cannot be
    /// listed. Per-record failures are written to the records, not returned.
    pub async fn process_pending_once(&self) -> Result<PassReport> {
        let records = self.store.list_processable(self.options.max_attempts).await?;
        if records.is_empty() {
            return Ok(PassReport::default());
        }
        tracing::debug!(count = records.len(), "Processing registrations");

        let reports: Vec<PassReport> = stream::iter(records)
            .map(|record| self.process_record(record.id))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let report = reports.into_iter().fold(PassReport::default(), |mut acc, r| {
            acc.merge(r);
            acc
        });
        tracing::info!(
            registered = report.registered,
            failed_retryable = report.failed_retryable,
            failed_terminal = report.failed_terminal,
            skipped = report.skipped,
            readmitted = report.readmitted,
            "Pass complete"
        );
        Ok(report)
    }

    async fn process_record(&self, id: RecordId) -> PassReport {
        if !self.claims.try_claim(&id).await {
            tracing::debug!(record_id = %id, "Already claimed; skipping");
            return PassReport::skipped();
        }
        let report = self.process_claimed(&id).await;
        self.claims.release(&id).await;
        report
    }

    async fn process_claimed(&self, id: &RecordId) -> PassReport {
        // The listing may be stale: another invocation can have finished this
        // record between our read and our claim.
        let record = match self.store.get(id).await {
            Ok(Some(record)) if record.is_processable(self.options.max_attempts) => record,
            Ok(_) => return PassReport::skipped(),
            Err(e) => {
                tracing::warn!(record_id = %id, error = %e, "Failed to re-read claimed record");
                return PassReport {
                    failed_retryable: 1,
                    ..PassReport::default()
                };
            }
        };

        let mut report = PassReport::default();
        let record = if record.status == RecordStatus::Error {
            match self.readmit(&record).await {
                Ok(readmitted) => {
                    report.readmitted = 1;
                    readmitted
                }
                Err(e) => {
                    tracing::warn!(record_id = %id, error = %e, "Failed to re-admit record");
                    report.failed_retryable = 1;
                    return report;
                }
            }
        } else {
            record
        };

        let mut record = record.begin_attempt();
        if let Err(e) = self.store.update(&record).await {
            tracing::warn!(record_id = %id, error = %e, "Failed to record attempt");
            report.failed_retryable = 1;
            return report;
        }

        match self.advance(&mut record).await {
            Ok(()) => {
                tracing::info!(
                    record_id = %id,
                    agent_name = record.resolved_name.as_deref().unwrap_or_default(),
                    chain_agent_id = record.chain_agent_id.as_deref().unwrap_or_default(),
                    tx_ref = record.tx_ref.as_deref().unwrap_or_default(),
                    "Registered agent"
                );
                report.registered = 1;
            }
            Err(err) => {
                self.write_failure(&record, &err).await;
                if err.is_retryable() {
                    report.failed_retryable = 1;
                } else {
                    report.failed_terminal = 1;
                }
            }
        }
        report
    }

    async fn readmit(&self, record: &RegistrationRecord) -> Result<RegistrationRecord> {
        let readmitted = record
            .readmitted()
            .map_err(|e| Error::InvalidState(e.to_string()))?;
        self.store.update(&readmitted).await?;
        tracing::debug!(record_id = %record.id, attempts = record.attempts, "Re-admitted retryable record");
        Ok(readmitted)
    }

    /// Steps from name resolution to commit. `record` tracks what has been
    /// learned so far so a failure write keeps it.
    ///
    /// The credential is always checked before the first chain call. The
    /// registered name is `metadata.requested_name` when one was supplied,
    /// otherwise the provider's display name. A name resolved by an earlier
    /// attempt is reused without asking the provider again.
    async fn advance(&self, record: &mut RegistrationRecord) -> std::result::Result<(), PipelineError> {
        let name = match record.resolved_name.clone() {
            Some(name) => name,
            None => {
                let display_name = self
                    .validator
                    .validate(&record.credential)
                    .await
                    .into_display_name()?;
                let name = record
                    .metadata
                    .requested_name
                    .clone()
                    .filter(|requested| !requested.trim().is_empty())
                    .unwrap_or(display_name);
                record.resolved_name = Some(name.clone());
                name
            }
        };

        let tx_ref = if let Some(tx_ref) = record.inflight_tx.clone() {
            tracing::info!(record_id = %record.id, tx_ref = %tx_ref, "Confirming previously submitted transaction");
            tx_ref
        } else {
            let uri = AgentCard::new(&name, &record.metadata, Utc::now())
                .to_uri()
                .map_err(|e| {
                    PipelineError::new(
                        ErrorKind::ChainSubmissionFailed,
                        format!("failed to encode agent metadata: {e}"),
                    )
                })?;
            self.registrar.preflight(&uri).await?;
            let tx_ref = self.registrar.submit(&uri).await?;

            *record = record.with_inflight(&name, &tx_ref);
            self.store.update(record).await?;
            tx_ref
        };

        let confirmation = match self.registrar.confirm(&tx_ref).await {
            Ok(confirmation) => confirmation,
            Err(e) => {
                if e.is_definitive() {
                    *record = record.without_inflight();
                }
                return Err(e.into());
            }
        };

        let registered = record
            .registered(&name, &confirmation.agent_id, &tx_ref, confirmation.id_source)
            .map_err(|e| PipelineError::new(ErrorKind::StoreUnavailable, e.to_string()))?;
        self.store.update(&registered).await?;
        *record = registered;
        Ok(())
    }

    async fn write_failure(&self, record: &RegistrationRecord, err: &PipelineError) {
        let failed = match record.failed(err.kind, &err.message, None) {
            Ok(failed) => failed,
            Err(e) => {
                tracing::error!(record_id = %record.id, error = %e, "Cannot mark record as failed");
                return;
            }
        };

        if err.is_retryable() {
            tracing::warn!(
                record_id = %record.id,
                kind = %err.kind,
                attempts = failed.attempts,
                error = failed.error_message.as_deref().unwrap_or_default(),
                "Registration attempt failed; will retry"
            );
        } else {
            tracing::warn!(
                record_id = %record.id,
                kind = %err.kind,
                error = failed.error_message.as_deref().unwrap_or_default(),
                "Registration failed permanently"
            );
        }

        if let Err(e) = self.store.update(&failed).await {
            tracing::error!(record_id = %record.id, error = %e, "Failed to persist registration failure");
        }
    }

    /// Process on every poll tick and on every pushed insert until shutdown.
    ///
    /// Both triggers feed this one loop, so passes never overlap. A shutdown
    /// signal is observed between passes; the pass in progress completes.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<ShutdownSignal>) -> RunSummary {
        let mut changes = self.store.changes();
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut summary = RunSummary::default();

        tracing::info!(
            poll_interval_secs = self.options.poll_interval.as_secs(),
            max_attempts = self.options.max_attempts,
            concurrency = self.options.concurrency,
            "Worker started"
        );

        loop {
            let trigger = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => Trigger::Timer,
                change = changes.recv() => match change {
                    Ok(change)
                        if change.kind == ChangeKind::Inserted
                            && change.record.status == RecordStatus::Pending =>
                    {
                        Trigger::Push
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(_)) => Trigger::Push,
                    Err(RecvError::Closed) => {
                        changes = self.store.changes();
                        continue;
                    }
                },
            };

            // Coalesce notifications that queued up; one pass covers them.
            loop {
                match changes.try_recv() {
                    Ok(_) | Err(TryRecvError::Lagged(_)) => {}
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }

            tracing::debug!(?trigger, "Starting pass");
            summary.passes += 1;
            match self.process_pending_once().await {
                Ok(report) => summary.totals.merge(report),
                Err(e) => {
                    summary.failed_passes += 1;
                    tracing::warn!(error = %e, "Pass failed; queue store unavailable");
                }
            }
        }

        tracing::info!(
            passes = summary.passes,
            registered = summary.totals.registered,
            failed_retryable = summary.totals.failed_retryable,
            failed_terminal = summary.totals.failed_terminal,
            "Worker stopped"
        );
        summary
    }
}
