//! 8004scan statistics.

use anyhow::Result;
use moltethos_core::scan::ScanClient;

use crate::output::{print_json, truncate};

pub async fn stats(scan: &ScanClient, token_id: Option<&str>, json: bool) -> Result<()> {
    if let Some(token_id) = token_id {
        let Some(stats) = scan.agent_stats(token_id).await else {
            anyhow::bail!("Token {token_id} is not listed on 8004scan");
        };
        if json {
            return print_json(&stats);
        }
        println!("#{token_id} {}", stats.name);
        println!("  Feedbacks: {}", stats.total_feedbacks);
        println!("  Score:     {:.2} (avg {:.2})", stats.total_score, stats.average_score);
        println!("  Stars:     {}", stats.star_count);
        println!("  Verified:  {}", stats.is_verified);
        return Ok(());
    }

    let all = scan.all_stats().await;
    if json {
        return print_json(&all);
    }
    if all.is_empty() {
        println!("No agents listed (or 8004scan unavailable)");
    }
    for (token_id, stats) in &all {
        println!(
            "#{token_id:<6} {:<24}  {:>4} feedbacks  avg {:>5.2}{}",
            truncate(&stats.name, 24),
            stats.total_feedbacks,
            stats.average_score,
            if stats.is_verified { "  verified" } else { "" },
        );
    }
    Ok(())
}
