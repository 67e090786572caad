//! MoltEthos CLI
//!
//! Binary name: `moltethos`

use std::process;

use moltethos::cli::{build_cli, handlers::dispatch};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();

    if let Err(err) = dispatch(&matches).await {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("Error: {err:#}");
        }
        #[allow(clippy::exit)]
        process::exit(1);
    }
}
