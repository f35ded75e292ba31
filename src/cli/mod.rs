//! CLI surface.
//!
//! The model crate's own `src/cli/mod.rs` is an unimplemented stub (a
//! command enum and a string parser, no backing logic); this is a fresh
//! `clap`-derive command set over the already-built subsystems (memory,
//! token-usage tracker, provider registry), following the subcommand-struct
//! shape used for `clap` CLIs in the sibling agent/LLM and observability
//! workspaces in the retrieval pack.

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use crate::llm::{GenerateOptions, ProviderRegistry};
use crate::memory::Memory;
use crate::tokens::TokenUsageTracker;

#[derive(Debug, Parser)]
#[command(name = "agentkit", version = crate::VERSION, about = "Orchestration engine CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Delete expired memory records and print the count removed.
    CleanupMemory,
    /// Delete token-usage rows older than `--days` and print the count removed.
    CleanupTokens {
        #[arg(long, default_value_t = 90)]
        days: i64,
    },
    /// Print memory and token-usage statistics.
    Stats {
        #[arg(long)]
        days: Option<i64>,
    },
    /// Send a single prompt to a configured provider to sanity-check credentials.
    TestProvider {
        name: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value = "hello")]
        prompt: String,
    },
}

/// Runs a parsed command against the process's subsystems, printing its
/// result to stdout. Returns `Err` for the CLI binary to map onto a
/// non-zero exit code and a single stderr line.
pub async fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::CleanupMemory => {
            let memory = Memory::open(&config.database_path)?;
            let deleted = memory.cleanup()?;
            println!("removed {deleted} expired memory record(s)");
            Ok(())
        }
        Command::CleanupTokens { days } => {
            let tracker = TokenUsageTracker::open(&config.database_path)?;
            let deleted = tracker.cleanup(days)?;
            println!("removed {deleted} token-usage row(s) older than {days} day(s)");
            Ok(())
        }
        Command::Stats { days } => {
            let memory = Memory::open(&config.database_path)?;
            let memory_stats = memory.get_stats()?;
            println!(
                "memory: {} record(s), {} expired",
                memory_stats.total_records, memory_stats.expired_records
            );

            let tracker = TokenUsageTracker::open(&config.database_path)?;
            let summary = tracker.get_summary()?;
            println!(
                "tokens (last 30d): {} request(s), {} token(s), {:.1} avg/request",
                summary.monthly_requests, summary.monthly_tokens, summary.avg_tokens_per_request
            );
            for row in tracker.get_stats(None, None, days)? {
                println!(
                    "  {} / {}: {} request(s), {} token(s)",
                    row.provider, row.model, row.requests, row.total_tokens
                );
            }
            Ok(())
        }
        Command::TestProvider { name, model, prompt } => {
            let registry = ProviderRegistry::from_config(config);
            let provider = registry.resolve(&name)?;
            let options = GenerateOptions {
                model,
                ..GenerateOptions::default()
            };
            let result = provider.generate(&prompt, &options).await?;
            println!("{}", result.text);
            if let Some(usage) = result.usage {
                println!(
                    "(usage: {} prompt + {} completion tokens)",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
            Ok(())
        }
    }
}
