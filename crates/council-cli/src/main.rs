//! Command-line front end for the council orchestrator
//!
//! Progress events are written to stdout as one JSON object per line; logs
//! go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Stream a balanced run
//! GROQ_API_KEY=... council ask "Explain quantum computing"
//!
//! # Compare modes before submitting
//! council estimate "Write a parser, then benchmark it"
//!
//! # Check that backends answer, not just breaker state
//! council health --probe
//!
//! # Keep records across invocations
//! council --store-dir ./records history --requester alice
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use council_coordination::{Council, CouncilConfig, ExecutionMode};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for JSON records (overrides COUNCIL_STORE_DIR and the config file)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a query and stream its progress events
    Ask {
        query: String,

        /// fast, balanced or best_quality
        #[arg(long, default_value = "balanced")]
        mode: ExecutionMode,

        #[arg(long, default_value = "cli")]
        requester: String,
    },

    /// Estimated cost and time for every mode
    Estimate { query: String },

    /// Circuit breaker state of every provider
    Health {
        /// Also ask each backend's `/models` endpoint whether it answers
        #[arg(long)]
        probe: bool,
    },

    /// Print a stored record
    Show { request_id: String },

    /// Delete a stored record
    Delete { request_id: String },

    /// Stored records of a requester, newest first
    History {
        #[arg(long, default_value = "cli")]
        requester: String,
    },
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

async fn ask(council: &Council, query: String, mode: ExecutionMode, requester: String) -> Result<()> {
    let mut submission = council
        .submit(query, mode, requester)
        .context("Failed to submit query")?;
    info!(request_id = %submission.request_id, %mode, "Query submitted");

    let mut failure = None;
    let mut interrupted = false;
    loop {
        let event = tokio::select! {
            event = submission.stream.next() => event,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                warn!(request_id = %submission.request_id, "Interrupted, cancelling");
                council.cancel(&submission.request_id);
                continue;
            }
        };
        let Some(event) = event else { break };
        if let Some((kind, reason)) = event.error() {
            failure = Some(format!("{kind}: {reason}"));
        }
        println!(
            "{}",
            event
                .to_json_line()
                .context("Failed to serialize progress event")?
        );
    }

    match failure {
        Some(reason) => bail!("Request {} failed ({reason})", submission.request_id),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config =
        CouncilConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = args.store_dir {
        config.store_dir = Some(dir);
    }
    let reads_records = matches!(
        args.command,
        Command::Show { .. } | Command::Delete { .. } | Command::History { .. }
    );
    if reads_records && config.store_dir.is_none() {
        warn!("No store directory configured; records do not outlive this process");
    }

    let council = Council::builder(config)
        .build()
        .await
        .context("Failed to start council")?;

    match args.command {
        Command::Ask {
            query,
            mode,
            requester,
        } => ask(&council, query, mode, requester).await?,
        Command::Estimate { query } => print_json(&council.estimate(&query))?,
        Command::Health { probe: false } => print_json(&council.provider_health())?,
        Command::Health { probe: true } => print_json(&council.check_providers().await)?,
        Command::Show { request_id } => {
            let record = council
                .get_result(&request_id)
                .await
                .with_context(|| format!("Failed to load record {request_id}"))?;
            print_json(&record)?;
        }
        Command::Delete { request_id } => {
            council
                .delete_record(&request_id)
                .await
                .with_context(|| format!("Failed to delete record {request_id}"))?;
            info!(%request_id, "Record deleted");
        }
        Command::History { requester } => {
            let records = council
                .history(&requester)
                .await
                .context("Failed to list records")?;
            print_json(&records)?;
        }
    }

    Ok(())
}
