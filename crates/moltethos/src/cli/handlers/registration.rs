use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};
use clap::ArgMatches;
use moltethos_core::{Credential, RecordId, RecordStatus, RegistrationMetadata};

use crate::{
    commands::registration::{self, SubmitOptions},
    context::AppContext,
    output::record_line,
};

fn metadata(matches: &ArgMatches) -> RegistrationMetadata {
    let arg = |name: &str| matches.get_one::<String>(name).cloned();
    RegistrationMetadata {
        requested_name: arg("name"),
        agent_type: arg("agent-type"),
        webpage_url: arg("webpage-url"),
        external_agent_ref: arg("agent-ref"),
    }
}

pub async fn handle_submit(ctx: &AppContext, matches: &ArgMatches, json: bool) -> Result<()> {
    let credential = matches
        .get_one::<String>("credential")
        .map(Credential::new)
        .context("--credential is required")?;

    if matches.get_flag("wait") {
        let pipeline = ctx.pipeline().await?;
        let record = registration::submit_and_wait(
            &pipeline,
            credential,
            metadata(matches),
            move |record| {
                if !json {
                    println!("  -> {}", record_line(&record));
                }
            },
        )
        .await?;
        return registration::print_record(&record, json);
    }

    let store = ctx.store().await?;
    registration::submit(
        store.as_ref(),
        SubmitOptions {
            credential,
            metadata: metadata(matches),
            json,
        },
    )
    .await
    .map(|_| ())
}

pub async fn handle_status(ctx: &AppContext, matches: &ArgMatches, json: bool) -> Result<()> {
    let id = matches
        .get_one::<String>("id")
        .map(RecordId::new)
        .context("record id is required")?;
    let store = ctx.store().await?;

    if matches.get_flag("watch") {
        let interval = matches.get_one::<u64>("interval").copied().unwrap_or(2);
        registration::watch(
            store.as_ref(),
            &id,
            Duration::from_secs(interval),
            ctx.config.worker.max_attempts,
            |record| {
                if let Err(e) = registration::print_record(record, json) {
                    tracing::warn!(error = %e, "Failed to print record");
                }
            },
        )
        .await
        .map(|_| ())
    } else {
        let record = registration::fetch(store.as_ref(), &id).await?;
        registration::print_record(&record, json)
    }
}

pub async fn handle_list(ctx: &AppContext, matches: &ArgMatches, json: bool) -> Result<()> {
    let status = matches
        .get_one::<String>("status")
        .map(|s| RecordStatus::from_str(s))
        .transpose()
        .context("Invalid --status")?;
    let store = ctx.store().await?;
    registration::list(store.as_ref(), status, json).await.map(|_| ())
}
