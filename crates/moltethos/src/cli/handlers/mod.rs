mod feedback;
mod registration;
mod scan;
mod worker;

use std::path::PathBuf;

use anyhow::Result;
use clap::ArgMatches;

use crate::context::AppContext;

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let ctx = AppContext::load(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))?;
    let json = matches.get_flag("json");

    match matches.subcommand() {
        Some(("worker", sub_m)) => worker::handle(&ctx, sub_m, json).await,
        Some(("submit", sub_m)) => registration::handle_submit(&ctx, sub_m, json).await,
        Some(("status", sub_m)) => registration::handle_status(&ctx, sub_m, json).await,
        Some(("list", sub_m)) => registration::handle_list(&ctx, sub_m, json).await,
        Some(("feedback", sub_m)) => feedback::handle(&ctx, sub_m, json).await,
        Some(("scan", sub_m)) => scan::handle(&ctx, sub_m, json).await,
        _ => anyhow::bail!("Unknown command. Run 'moltethos --help' for usage."),
    }
}
