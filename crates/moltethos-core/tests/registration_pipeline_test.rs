//! BDD Tests for the Registration Pipeline
//!
//! Domain: registration queue processing
//!
//! Feature: Exactly one outcome per attempt
//!   As an agent operator
//!   I want every submitted credential to end registered or failed
//!   So that I can tell what happened to my registration
//!
//! Feature: Retry policy by error kind
//!   As a worker
//!   I want retryable failures re-admitted and terminal ones left alone
//!   So that transient chain or provider problems heal without resubmission

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use moltethos_core::{
    chain::{ChainError, ChainRegistrar, Confirmation},
    shutdown::ShutdownTrigger,
    store::SqliteQueueStore,
    validator::{IdentityValidator, ValidationOutcome},
    Credential, ErrorKind, IdSource, PipelineOptions, QueueStore, RecordId, RecordStatus,
    RegistrationMetadata, RegistrationPipeline, RegistrationRecord, StatusNotifier,
};
use proptest::prelude::*;

// ═══════════════════════════════════════════════════════════════════════════
// TEST DOUBLES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct MockValidator {
    calls: AtomicUsize,
}

#[async_trait::async_trait]
impl IdentityValidator for MockValidator {
    async fn validate(&self, credential: &Credential) -> ValidationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match credential.expose() {
            "good_key" => ValidationOutcome::Valid {
                display_name: "Alice".to_string(),
            },
            "flaky_key" => ValidationOutcome::Unavailable {
                reason: "connection reset while sending flaky_key".to_string(),
            },
            _ => ValidationOutcome::Rejected {
                reason: "Invalid API key".to_string(),
            },
        }
    }
}

struct MockRegistrar {
    funded: AtomicBool,
    submit_delay: Duration,
    preflights: AtomicUsize,
    submits: AtomicUsize,
    confirms: AtomicUsize,
    confirm_script: Mutex<VecDeque<Result<Confirmation, ChainError>>>,
    uris: Mutex<Vec<String>>,
}

impl MockRegistrar {
    fn funded() -> Self {
        Self {
            funded: AtomicBool::new(true),
            submit_delay: Duration::ZERO,
            preflights: AtomicUsize::new(0),
            submits: AtomicUsize::new(0),
            confirms: AtomicUsize::new(0),
            confirm_script: Mutex::new(VecDeque::new()),
            uris: Mutex::new(Vec::new()),
        }
    }

    fn unfunded() -> Self {
        let registrar = Self::funded();
        registrar.funded.store(false, Ordering::SeqCst);
        registrar
    }

    fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    fn script_confirm(&self, result: Result<Confirmation, ChainError>) {
        self.confirm_script.lock().unwrap().push_back(result);
    }

    fn chain_calls(&self) -> usize {
        self.preflights.load(Ordering::SeqCst)
            + self.submits.load(Ordering::SeqCst)
            + self.confirms.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ChainRegistrar for MockRegistrar {
    async fn preflight(&self, _agent_uri: &str) -> Result<(), ChainError> {
        self.preflights.fetch_add(1, Ordering::SeqCst);
        if self.funded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChainError::InsufficientFunds(
                "balance 0 wei is below the estimated fee".to_string(),
            ))
        }
    }

    async fn submit(&self, agent_uri: &str) -> Result<String, ChainError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.submit_delay).await;
        self.uris.lock().unwrap().push(agent_uri.to_string());
        Ok("0xabc".to_string())
    }

    async fn confirm(&self, _tx_ref: &str) -> Result<Confirmation, ChainError> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        self.confirm_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(Confirmation {
                    agent_id: "7".to_string(),
                    id_source: IdSource::Event,
                })
            })
    }
}

struct Harness {
    pipeline: Arc<RegistrationPipeline>,
    store: Arc<SqliteQueueStore>,
    validator: Arc<MockValidator>,
    registrar: Arc<MockRegistrar>,
}

impl Harness {
    async fn new(registrar: MockRegistrar) -> Self {
        Self::with_options(registrar, PipelineOptions::default()).await
    }

    async fn with_options(registrar: MockRegistrar, options: PipelineOptions) -> Self {
        let store = Arc::new(SqliteQueueStore::open_in_memory().await.unwrap());
        let validator = Arc::new(MockValidator::default());
        let registrar = Arc::new(registrar);
        let pipeline = Arc::new(RegistrationPipeline::new(
            store.clone(),
            validator.clone(),
            registrar.clone(),
            options,
        ));
        Self {
            pipeline,
            store,
            validator,
            registrar,
        }
    }

    async fn submit(&self, key: &str) -> RecordId {
        self.pipeline
            .submit(Credential::new(key), RegistrationMetadata::default())
            .await
            .unwrap()
    }

    async fn record(&self, id: &RecordId) -> RegistrationRecord {
        self.store.get(id).await.unwrap().unwrap()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SUBMISSION
// ═══════════════════════════════════════════════════════════════════════════

/// Scenario: a submitted registration is immediately readable as pending
#[tokio::test]
async fn test_submit_returns_id_of_pending_record() {
    let h = Harness::new(MockRegistrar::funded()).await;

    let id = h.submit("good_key").await;
    let record = h.record(&id).await;

    assert_eq!(record.status, RecordStatus::Pending);
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.registrar.chain_calls(), 0);
}

/// Scenario: an empty credential is refused at submission
#[tokio::test]
async fn test_submit_rejects_empty_credential() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let result = h
        .pipeline
        .submit(Credential::new("  "), RegistrationMetadata::default())
        .await;
    assert!(result.is_err());
    assert!(h.store.list_all().await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// OUTCOMES
// ═══════════════════════════════════════════════════════════════════════════

/// Scenario: good credential, successful chain registration
///   Given a submission with credential "good_key"
///   When one pass runs
///   Then the record is registered as Alice with agent id 7 and tx 0xabc
#[tokio::test]
async fn test_good_key_is_registered() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let id = h.submit("good_key").await;

    let report = h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(report.registered, 1);
    assert_eq!(record.status, RecordStatus::Registered);
    assert_eq!(record.resolved_name.as_deref(), Some("Alice"));
    assert_eq!(record.chain_agent_id.as_deref(), Some("7"));
    assert_eq!(record.tx_ref.as_deref(), Some("0xabc"));
    assert_eq!(record.id_source, Some(IdSource::Event));
    assert_eq!(record.inflight_tx, None);
    assert!(record.outcome_is_consistent());
    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 1);

    let uri = h.registrar.uris.lock().unwrap()[0].clone();
    let card: serde_json::Value = serde_json::from_str(&uri).unwrap();
    assert_eq!(card["name"], "Alice");
    assert_eq!(card["agentType"], "other");
}

/// Scenario: rejected credential never reaches the chain
///   Given a submission with credential "bad_key"
///   When passes run
///   Then the record is in error mentioning the credential
///   And the registrar received zero calls
#[tokio::test]
async fn test_bad_key_fails_without_chain_calls() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let id = h.submit("bad_key").await;

    let report = h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(report.failed_terminal, 1);
    assert_eq!(record.status, RecordStatus::Error);
    assert_eq!(record.error_kind, Some(ErrorKind::InvalidCredential));
    assert!(record.error_message.as_deref().unwrap().contains("credential"));
    assert!(record.outcome_is_consistent());
    assert_eq!(h.registrar.chain_calls(), 0);

    // Terminal: a later pass leaves it alone.
    let report = h.pipeline.process_pending_once().await.unwrap();
    assert_eq!(report.attempted(), 0);
    assert_eq!(h.record(&id).await.attempts, 1);
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// NAME RESOLUTION
// ═══════════════════════════════════════════════════════════════════════════

async fn insert_raw(h: &Harness, id: &str, api_key: &str, agent_name: &str) {
    sqlx::query(
        "INSERT INTO registrations (id, api_key, status, agent_name, attempts, created_at) \
         VALUES (?, ?, 'pending', ?, 0, '2025-02-11T09:30:00.000000Z')",
    )
    .bind(id)
    .bind(api_key)
    .bind(agent_name)
    .execute(h.store.pool())
    .await
    .unwrap();
}

/// Scenario: a requested name is registered once the credential checks out
///   Given a submission with credential "good_key" and requested name "alice-bot"
///   When one pass runs
///   Then the credential was checked once
///   And the agent is registered as "alice-bot"
#[tokio::test]
async fn test_requested_name_is_registered_after_validation() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let metadata = RegistrationMetadata {
        requested_name: Some("alice-bot".to_string()),
        ..RegistrationMetadata::default()
    };
    let id = h.pipeline.submit(Credential::new("good_key"), metadata).await.unwrap();

    h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(record.status, RecordStatus::Registered);
    assert_eq!(record.resolved_name.as_deref(), Some("alice-bot"));
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 1);
    let uri = h.registrar.uris.lock().unwrap()[0].clone();
    let card: serde_json::Value = serde_json::from_str(&uri).unwrap();
    assert_eq!(card["name"], "alice-bot");
}

/// Scenario: a requested name does not stand in for a valid credential
///   Given a submission with credential "bad_key" and requested name "Bob"
///   And a row written by another client with credential "bad_key" and agent name "Mallory"
///   When one pass runs
///   Then both records fail as invalid credentials
///   And the registrar received zero calls
#[tokio::test]
async fn test_supplied_names_never_skip_credential_check() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let metadata = RegistrationMetadata {
        requested_name: Some("Bob".to_string()),
        ..RegistrationMetadata::default()
    };
    let submitted = h.pipeline.submit(Credential::new("bad_key"), metadata).await.unwrap();
    insert_raw(&h, "external-1", "bad_key", "Mallory").await;
    let external = RecordId::new("external-1");

    let before = h.record(&external).await;
    assert_eq!(before.metadata.requested_name.as_deref(), Some("Mallory"));
    assert_eq!(before.resolved_name, None);

    let report = h.pipeline.process_pending_once().await.unwrap();

    assert_eq!(report.failed_terminal, 2);
    for id in [&submitted, &external] {
        let record = h.record(id).await;
        assert_eq!(record.status, RecordStatus::Error);
        assert_eq!(record.error_kind, Some(ErrorKind::InvalidCredential));
        assert!(record.outcome_is_consistent());
    }
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.registrar.chain_calls(), 0);
}

/// Scenario: an agent name on a row written by another client is a request
///   Given a row with credential "good_key" and agent name "alice-bot"
///   When one pass runs
///   Then the credential was checked
///   And the agent is registered as "alice-bot"
#[tokio::test]
async fn test_external_agent_name_follows_the_requested_name_rule() {
    let h = Harness::new(MockRegistrar::funded()).await;
    insert_raw(&h, "external-2", "good_key", "alice-bot").await;

    h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&RecordId::new("external-2")).await;

    assert_eq!(record.status, RecordStatus::Registered);
    assert_eq!(record.resolved_name.as_deref(), Some("alice-bot"));
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// UNREADABLE ROWS
// ═══════════════════════════════════════════════════════════════════════════

/// Scenario: one unreadable row does not stall the queue
///   Given a submission with credential "good_key"
///   And a pending row whose created_at is "yesterday"
///   When one pass runs
///   Then the pass succeeds and the good record is registered
#[tokio::test]
async fn test_unreadable_row_does_not_block_the_pass() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let id = h.submit("good_key").await;
    sqlx::query(
        "INSERT INTO registrations (id, api_key, status, attempts, created_at) \
         VALUES ('broken-1', 'good_key', 'pending', 0, 'yesterday')",
    )
    .execute(h.store.pool())
    .await
    .unwrap();

    let report = h.pipeline.process_pending_once().await.unwrap();

    assert_eq!(report.registered, 1);
    assert_eq!(h.record(&id).await.status, RecordStatus::Registered);
    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 1);
}

/// Scenario: insufficient funds heal on a later pass
///   Given a validated submission and an unfunded account
///   When one pass runs
///   Then the record is in error with a retryable kind
///   When the account is funded and another pass runs
///   Then the record is registered
#[tokio::test]
async fn test_insufficient_funds_is_retried_after_funding() {
    let h = Harness::new(MockRegistrar::unfunded()).await;
    let id = h.submit("good_key").await;

    let report = h.pipeline.process_pending_once().await.unwrap();
    let failed = h.record(&id).await;
    assert_eq!(report.failed_retryable, 1);
    assert_eq!(failed.status, RecordStatus::Error);
    assert_eq!(failed.error_kind, Some(ErrorKind::InsufficientFunds));
    assert!(failed.is_processable(PipelineOptions::default().max_attempts));
    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 0);

    h.registrar.funded.store(true, Ordering::SeqCst);
    let report = h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(report.readmitted, 1);
    assert_eq!(report.registered, 1);
    assert_eq!(record.status, RecordStatus::Registered);
    assert_eq!(record.error_message, None);
    assert_eq!(record.attempts, 2);
    // The display name from the first attempt is reused.
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 1);
}

/// Scenario: an unreachable identity provider is retryable and never leaks the key
#[tokio::test]
async fn test_provider_outage_is_retryable_and_scrubbed() {
    let h = Harness::new(MockRegistrar::funded()).await;
    let id = h.submit("flaky_key").await;

    h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(record.error_kind, Some(ErrorKind::ProviderUnavailable));
    let message = record.error_message.unwrap();
    assert!(!message.contains("flaky_key"));
    assert!(message.contains("[redacted]"));
    assert_eq!(h.registrar.chain_calls(), 0);
}

/// Scenario: retries stop once the attempt budget is spent
#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let options = PipelineOptions {
        max_attempts: 2,
        ..PipelineOptions::default()
    };
    let h = Harness::with_options(MockRegistrar::unfunded(), options).await;
    let id = h.submit("good_key").await;

    for _ in 0..4 {
        h.pipeline.process_pending_once().await.unwrap();
    }
    let record = h.record(&id).await;

    assert_eq!(record.status, RecordStatus::Error);
    assert_eq!(record.attempts, 2);
    assert_eq!(h.registrar.preflights.load(Ordering::SeqCst), 2);
}

/// Scenario: a counter-derived id is flagged as such
#[tokio::test]
async fn test_counter_fallback_is_flagged() {
    let h = Harness::new(MockRegistrar::funded()).await;
    h.registrar.script_confirm(Ok(Confirmation {
        agent_id: "41".to_string(),
        id_source: IdSource::Counter,
    }));
    let id = h.submit("good_key").await;

    h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(record.chain_agent_id.as_deref(), Some("41"));
    assert_eq!(record.id_source, Some(IdSource::Counter));
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-FLIGHT TRANSACTIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Scenario: a receipt timeout keeps the submitted transaction
///   Given a submitted transaction whose receipt timed out
///   When the next pass runs
///   Then the same transaction is confirmed instead of a new submission
#[tokio::test]
async fn test_timeout_confirms_existing_transaction_on_retry() {
    let h = Harness::new(MockRegistrar::funded()).await;
    h.registrar
        .script_confirm(Err(ChainError::Timeout("no receipt for 0xabc".to_string())));
    let id = h.submit("good_key").await;

    h.pipeline.process_pending_once().await.unwrap();
    let failed = h.record(&id).await;
    assert_eq!(failed.error_kind, Some(ErrorKind::ChainSubmissionFailed));
    assert_eq!(failed.inflight_tx.as_deref(), Some("0xabc"));
    assert_eq!(failed.tx_ref, None);
    assert!(failed.outcome_is_consistent());

    h.pipeline.process_pending_once().await.unwrap();
    let record = h.record(&id).await;

    assert_eq!(record.status, RecordStatus::Registered);
    assert_eq!(record.inflight_tx, None);
    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 1);
    assert_eq!(h.registrar.confirms.load(Ordering::SeqCst), 2);
}

/// Scenario: a reverted transaction is resubmitted on retry
#[tokio::test]
async fn test_revert_clears_inflight_marker() {
    let h = Harness::new(MockRegistrar::funded()).await;
    h.registrar
        .script_confirm(Err(ChainError::Reverted("0xabc".to_string())));
    let id = h.submit("good_key").await;

    h.pipeline.process_pending_once().await.unwrap();
    assert_eq!(h.record(&id).await.inflight_tx, None);

    h.pipeline.process_pending_once().await.unwrap();
    assert_eq!(h.record(&id).await.status, RecordStatus::Registered);
    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// CONCURRENCY
// ═══════════════════════════════════════════════════════════════════════════

/// Scenario: two racing passes submit at most once per record
#[tokio::test]
async fn test_racing_passes_submit_once() {
    let h = Harness::new(MockRegistrar::funded().with_submit_delay(Duration::from_millis(50))).await;
    let id = h.submit("good_key").await;

    let first = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.process_pending_once().await })
    };
    let second = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move { pipeline.process_pending_once().await })
    };
    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();

    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 1);
    assert_eq!(first.registered + second.registered, 1);
    assert_eq!(h.record(&id).await.status, RecordStatus::Registered);
    assert_eq!(h.pipeline.claims().count().await, 0);
}

/// Scenario: concurrent processing within a pass still registers each record once
#[tokio::test]
async fn test_bounded_concurrency_registers_every_record_once() {
    let options = PipelineOptions {
        concurrency: 4,
        ..PipelineOptions::default()
    };
    let h = Harness::with_options(
        MockRegistrar::funded().with_submit_delay(Duration::from_millis(10)),
        options,
    )
    .await;
    for _ in 0..6 {
        h.submit("good_key").await;
    }

    let report = h.pipeline.process_pending_once().await.unwrap();

    assert_eq!(report.registered, 6);
    assert_eq!(h.registrar.submits.load(Ordering::SeqCst), 6);
    assert!(h.store.list_by_status(RecordStatus::Pending).await.unwrap().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// WORKER LOOP AND NOTIFICATIONS
// ═══════════════════════════════════════════════════════════════════════════

/// Scenario: a pushed insert is processed without waiting for the poll timer,
/// and a subscriber sees the terminal snapshot
#[tokio::test]
async fn test_run_processes_pushed_inserts_and_stops_on_shutdown() {
    let options = PipelineOptions {
        poll_interval: Duration::from_secs(3600),
        ..PipelineOptions::default()
    };
    let h = Harness::with_options(MockRegistrar::funded(), options).await;
    let trigger = ShutdownTrigger::new();

    let worker = {
        let pipeline = h.pipeline.clone();
        let shutdown = trigger.subscribe();
        tokio::spawn(async move { pipeline.run(shutdown).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let id = h.submit("good_key").await;
    let notifier = StatusNotifier::new(h.store.clone());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let _subscription = notifier.subscribe(id.clone(), move |record| {
        let _ = tx.send(record);
    });

    let registered = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let record = rx.recv().await.unwrap();
            if record.status == RecordStatus::Registered {
                break record;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(registered.chain_agent_id.as_deref(), Some("7"));

    trigger.trigger();
    let summary = tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();
    assert!(summary.passes >= 2);
    assert_eq!(summary.totals.registered, 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════

fn scripted_confirm(step: u8) -> Result<Confirmation, ChainError> {
    match step % 4 {
        0 => Ok(Confirmation {
            agent_id: "7".to_string(),
            id_source: IdSource::Event,
        }),
        1 => Err(ChainError::Timeout("0xabc".to_string())),
        2 => Err(ChainError::Reverted("0xabc".to_string())),
        _ => Err(ChainError::Rpc("node unavailable".to_string())),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Whatever the chain does, every record stays consistent after each pass
    /// and is never registered twice.
    #[test]
    fn prop_outcomes_stay_consistent(
        keys in proptest::collection::vec(prop_oneof![Just("good_key"), Just("bad_key")], 1..4),
        script in proptest::collection::vec(any::<u8>(), 0..6),
        funded in any::<bool>(),
    ) {
        tokio_test::block_on(async {
            let registrar = if funded { MockRegistrar::funded() } else { MockRegistrar::unfunded() };
            let h = Harness::new(registrar).await;
            for step in &script {
                h.registrar.script_confirm(scripted_confirm(*step));
            }
            let mut ids = Vec::new();
            for key in &keys {
                ids.push(h.submit(key).await);
            }

            let mut registered: HashSet<RecordId> = HashSet::new();
            for _ in 0..4 {
                h.pipeline.process_pending_once().await.unwrap();
                for id in &ids {
                    let record = h.record(id).await;
                    prop_assert!(record.outcome_is_consistent());
                    if registered.contains(id) {
                        prop_assert_eq!(record.status, RecordStatus::Registered);
                    }
                    if record.status == RecordStatus::Registered {
                        prop_assert_eq!(record.chain_agent_id.as_deref(), Some("7"));
                        registered.insert(id.clone());
                    }
                }
            }

            let bad = keys.iter().filter(|k| **k == "bad_key").count();
            prop_assert!(h.registrar.submits.load(Ordering::SeqCst) <= (keys.len() - bad) * 4);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
