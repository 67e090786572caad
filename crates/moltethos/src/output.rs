//! Text and JSON rendering for command results.

use anyhow::{Context, Result};
use moltethos_core::RegistrationRecord;
use serde::Serialize;

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{rendered}");
    Ok(())
}

#[must_use]
pub fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let cut: String = value.chars().take(width.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

/// One-line summary: status plus the outcome fields that apply.
#[must_use]
pub fn record_line(record: &RegistrationRecord) -> String {
    let name = record.resolved_name.as_deref().unwrap_or("-");
    match record.status {
        moltethos_core::RecordStatus::Registered => format!(
            "{} registered {name} as agent #{} (tx {})",
            record.id,
            record.chain_agent_id.as_deref().unwrap_or("?"),
            record.tx_ref.as_deref().unwrap_or("?"),
        ),
        moltethos_core::RecordStatus::Error => format!(
            "{} error [{}] {} (attempt {})",
            record.id,
            record
                .error_kind
                .map_or_else(|| "unknown".to_string(), |kind| kind.to_string()),
            record.error_message.as_deref().unwrap_or(""),
            record.attempts,
        ),
        moltethos_core::RecordStatus::Pending => match &record.inflight_tx {
            Some(tx) => format!("{} pending, awaiting receipt for {tx}", record.id),
            None => format!("{} pending (attempt {})", record.id, record.attempts),
        },
    }
}

pub fn print_record_table(records: &[RegistrationRecord]) {
    if records.is_empty() {
        println!("No registrations");
        return;
    }

    println!(
        "{:<36}  {:<10}  {:<20}  {:<8}  {:<8}  {}",
        "ID", "STATUS", "NAME", "AGENT", "ATTEMPTS", "CREATED"
    );
    for record in records {
        println!(
            "{:<36}  {:<10}  {:<20}  {:<8}  {:<8}  {}",
            truncate(record.id.as_str(), 36),
            record.status,
            truncate(record.resolved_name.as_deref().unwrap_or("-"), 20),
            record.chain_agent_id.as_deref().unwrap_or("-"),
            record.attempts,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
}
