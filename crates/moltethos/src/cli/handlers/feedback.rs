use anyhow::{Context, Result};
use clap::ArgMatches;
use moltethos_core::feedback::NewFeedback;

use crate::{commands::feedback, context::AppContext};

pub async fn handle(ctx: &AppContext, matches: &ArgMatches, json: bool) -> Result<()> {
    let ledger = ctx.ledger().await?;

    match matches.subcommand() {
        Some(("add", sub_m)) => {
            let arg = |name: &str| sub_m.get_one::<String>(name).cloned();
            let entry = NewFeedback {
                agent_name: arg("agent").context("--agent is required")?,
                reviewer_name: arg("reviewer"),
                value: sub_m
                    .get_one::<i64>("value")
                    .copied()
                    .context("--value is required")?,
                comment: arg("comment"),
                tx_hash: arg("tx"),
            };
            feedback::add(&ledger, entry, json).await.map(|_| ())
        }
        Some(("list", sub_m)) => {
            let agent = sub_m
                .get_one::<String>("agent")
                .context("agent name is required")?;
            feedback::list(&ledger, agent, json).await
        }
        Some(("stats", _)) => feedback::stats(&ledger, json).await,
        _ => anyhow::bail!("Unknown feedback subcommand. Run 'moltethos feedback --help' for usage."),
    }
}
