//! Thin binary entry point: install logging, parse arguments, run the CLI.

use clap::Parser;
use lan_file_sharer_cli::{run, Cli};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "lan-file-sharer exited with an error");
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }

    Ok(())
}
