//! CLI binary entry point.
//!
//! Loads `Config::from_env()`, parses argv with `clap`, and dispatches into
//! `agentkit::cli::run`. Exit code is 0 on success; on failure a single
//! line is written to stderr and the process exits non-zero, per the
//! error-handling design's CLI-boundary contract.

use agentkit::cli::Cli;
use agentkit::config::Config;
use clap::Parser;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();
    if config.log_enabled {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();
    }

    let cli = Cli::parse();
    agentkit::cli::run(cli.command, &config).await?;
    Ok(())
}
