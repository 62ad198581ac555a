//! # Foresight CLI
//!
//! The `foresight` binary serves the JSON HTTP API and offers one-shot
//! commands for operating the knowledge base from a shell.
//!
//! ```bash
//! foresight --config ./config/foresight.toml serve
//! foresight rebuild
//! foresight ask "what does the deployment runbook say about rollback?"
//! foresight documents
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use foresight::config::load_config;
use foresight::server::{run_server, AppState};
use foresight::tasks::{RebuildReason, TaskStatus};

/// Foresight — a knowledge-base retrieval and progress-forecasting backend
/// for issue trackers.
#[derive(Parser)]
#[command(
    name = "foresight",
    about = "A knowledge-base retrieval and progress-forecasting backend for issue trackers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/foresight.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the JSON HTTP API server.
    Serve,
    /// Rebuild the vector index from the current document set and wait for
    /// the result.
    Rebuild,
    /// Ask a single question against the knowledge base.
    Ask { question: String },
    /// List the documents currently in the knowledge base.
    Documents,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let state = AppState::from_config(config)?;

    match cli.command {
        Commands::Serve => {
            run_server(state).await?;
        }
        Commands::Rebuild => {
            let snapshot = state.indexer().rebuild_now(RebuildReason::Manual).await?;
            println!("task {}", snapshot.id);
            println!("  progress: {}%", snapshot.progress);
            println!("  message: {}", snapshot.message);
            if snapshot.status == TaskStatus::Failed {
                eprintln!("rebuild failed");
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Ask { question } => {
            let answer = state.pipeline().answer(&question, &[]).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for citation in &answer.sources {
                    println!("  - {}", citation.source);
                }
            }
        }
        Commands::Documents => {
            let documents = state.indexer().store().list()?;
            if documents.is_empty() {
                println!("The knowledge base is empty.");
            } else {
                for filename in documents {
                    println!("{}", filename);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
