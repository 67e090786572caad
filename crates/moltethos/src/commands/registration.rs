//! Queue-facing commands: submit, status and list.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use moltethos_core::{
    enqueue, Credential, QueueStore, RecordId, RecordStatus, RegistrationMetadata,
    RegistrationPipeline, RegistrationRecord, StatusNotifier,
};

use crate::output::{print_json, print_record_table, record_line};

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub credential: Credential,
    pub metadata: RegistrationMetadata,
    pub json: bool,
}

/// Queue a registration and print its id.
pub async fn submit(store: &dyn QueueStore, options: SubmitOptions) -> Result<RecordId> {
    let id = enqueue(store, options.credential, options.metadata)
        .await
        .context("Failed to queue registration")?;

    if options.json {
        print_json(&serde_json::json!({ "id": id, "status": RecordStatus::Pending }))?;
    } else {
        println!("Queued registration {id}");
        println!("Run 'moltethos status {id} --watch' to follow it.");
    }
    Ok(id)
}

/// Queue a registration, run one pass in this process and return the
/// record as that pass left it. `on_change` sees every write to the record.
pub async fn submit_and_wait<F>(
    pipeline: &RegistrationPipeline,
    credential: Credential,
    metadata: RegistrationMetadata,
    on_change: F,
) -> Result<RegistrationRecord>
where
    F: Fn(RegistrationRecord) + Send + Sync + 'static,
{
    let id = pipeline
        .submit(credential, metadata)
        .await
        .context("Failed to queue registration")?;

    let notifier = StatusNotifier::new(Arc::clone(pipeline.store()));
    let subscription = notifier.subscribe(id.clone(), on_change);
    let pass = pipeline.process_pending_once().await;
    subscription.unsubscribe().await;
    pass.context("Processing pass failed")?;

    fetch(pipeline.store().as_ref(), &id).await
}

/// Read one record, failing if it does not exist.
pub async fn fetch(store: &dyn QueueStore, id: &RecordId) -> Result<RegistrationRecord> {
    store
        .get(id)
        .await
        .with_context(|| format!("Failed to read registration {id}"))?
        .with_context(|| format!("Registration {id} not found"))
}

/// Poll `id` until no further processing will happen to it.
///
/// `on_change` runs for the first read and whenever the record was written
/// since the previous read.
pub async fn watch<F>(
    store: &dyn QueueStore,
    id: &RecordId,
    interval: Duration,
    max_attempts: u32,
    mut on_change: F,
) -> Result<RegistrationRecord>
where
    F: FnMut(&RegistrationRecord),
{
    let mut ticker = tokio::time::interval(interval);
    let mut last_seen = None;

    loop {
        ticker.tick().await;
        let record = fetch(store, id).await?;
        if last_seen != Some(record.updated_at) {
            last_seen = Some(record.updated_at);
            on_change(&record);
        }
        if !record.is_processable(max_attempts) {
            return Ok(record);
        }
    }
}

pub async fn list(
    store: &dyn QueueStore,
    status: Option<RecordStatus>,
    json: bool,
) -> Result<Vec<RegistrationRecord>> {
    let records = match status {
        Some(status) => {
            let mut records = store
                .list_by_status(status)
                .await
                .context("Failed to list registrations")?;
            records.reverse();
            records
        }
        None => store.list_all().await.context("Failed to list registrations")?,
    };

    if json {
        print_json(&records)?;
    } else {
        print_record_table(&records);
    }
    Ok(records)
}

pub fn print_record(record: &RegistrationRecord, json: bool) -> Result<()> {
    if json {
        print_json(record)
    } else {
        println!("{}", record_line(record));
        Ok(())
    }
}
