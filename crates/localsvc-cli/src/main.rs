//! localsvc - discover, watch, start and stop local service checkouts.

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "localsvc=info,localsvc_services=info,localsvc_scheduler=info".into()
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    Cli::parse().run().await
}
