//! Worker commands: a long-running loop or a single pass.

use anyhow::{Context, Result};
use moltethos_core::{
    shutdown::{wait_for_shutdown_signal, ShutdownTrigger},
    PassReport, RegistrationPipeline, RunSummary,
};

use crate::output::print_json;

/// One pass over the queue.
pub async fn once(pipeline: &RegistrationPipeline, json: bool) -> Result<PassReport> {
    let report = pipeline
        .process_pending_once()
        .await
        .context("Processing pass failed")?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(report)
}

/// Run until SIGINT or SIGTERM. The pass in progress finishes first.
pub async fn run(pipeline: &RegistrationPipeline, json: bool) -> Result<RunSummary> {
    let trigger = ShutdownTrigger::new();
    let shutdown = trigger.subscribe();
    let signals = tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown requested; finishing current pass");
        trigger.trigger();
    });

    let summary = pipeline.run(shutdown).await;
    signals.abort();

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "Worker stopped after {} passes ({} failed)",
            summary.passes, summary.failed_passes
        );
        print_report(&summary.totals);
    }
    Ok(summary)
}

fn print_report(report: &PassReport) {
    println!("  Registered:        {}", report.registered);
    println!("  Failed (retry):    {}", report.failed_retryable);
    println!("  Failed (terminal): {}", report.failed_terminal);
    println!("  Re-admitted:       {}", report.readmitted);
    println!("  Skipped:           {}", report.skipped);
}
