use anyhow::Result;
use clap::ArgMatches;

use crate::{commands::worker, context::AppContext};

pub async fn handle(ctx: &AppContext, matches: &ArgMatches, json: bool) -> Result<()> {
    let pipeline = ctx.pipeline().await?;
    match matches.subcommand_name() {
        Some("run") => worker::run(&pipeline, json).await.map(|_| ()),
        Some("once") => worker::once(&pipeline, json).await.map(|_| ()),
        _ => anyhow::bail!("Unknown worker subcommand. Run 'moltethos worker --help' for usage."),
    }
}
