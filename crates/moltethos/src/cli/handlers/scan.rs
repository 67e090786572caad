use anyhow::Result;
use clap::ArgMatches;

use crate::{commands::scan, context::AppContext};

pub async fn handle(ctx: &AppContext, matches: &ArgMatches, json: bool) -> Result<()> {
    match matches.subcommand() {
        Some(("stats", sub_m)) => {
            let client = ctx.scan()?;
            let token_id = sub_m.get_one::<String>("token-id").map(String::as_str);
            scan::stats(&client, token_id, json).await
        }
        _ => anyhow::bail!("Unknown scan subcommand. Run 'moltethos scan --help' for usage."),
    }
}
