//! Feedback ledger commands.

use anyhow::{Context, Result};
use moltethos_core::feedback::{FeedbackLedger, NewFeedback};

use crate::output::{print_json, truncate};

pub async fn add(ledger: &FeedbackLedger, feedback: NewFeedback, json: bool) -> Result<i64> {
    let agent = feedback.agent_name.clone();
    let id = ledger
        .submit_feedback(feedback)
        .await
        .with_context(|| format!("Failed to record feedback for {agent}"))?;

    if json {
        print_json(&serde_json::json!({ "id": id, "agentName": agent }))?;
    } else {
        println!("Recorded feedback #{id} for {agent}");
    }
    Ok(id)
}

pub async fn list(ledger: &FeedbackLedger, agent: &str, json: bool) -> Result<()> {
    let entries = ledger.feedbacks_for_agent(agent).await?;
    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("No feedback for {agent}");
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{:>5}  {:<20}  {:<40}  {}",
            entry.value,
            truncate(&entry.reviewer_name, 20),
            truncate(&entry.comment, 40),
            entry.tx_hash.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

pub async fn stats(ledger: &FeedbackLedger, json: bool) -> Result<()> {
    let stats = ledger.feedback_stats().await?;
    if json {
        return print_json(&stats);
    }

    if stats.is_empty() {
        println!("No feedback recorded");
    }
    for (agent, entry) in &stats {
        println!("{:<30}  {:>5} entries  total {:>6}", truncate(agent, 30), entry.count, entry.total);
    }
    Ok(())
}
