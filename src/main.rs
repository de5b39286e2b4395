//! Stowage - daemonless ADD/COPY content ingestion
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use stowage::cli::{Cli, Commands};
use stowage::config::ConfigManager;
use stowage::error::StowageResult;
use stowage::ingest::Verb;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StowageResult<()> {
    let cli = Cli::parse();

    // 0 = warn, 1 = info, 2+ = debug; stdout is reserved for the digest
    let filter = match cli.verbose {
        0 => EnvFilter::new("stowage=warn"),
        1 => EnvFilter::new("stowage=info"),
        _ => EnvFilter::new("stowage=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;
    debug!("Loaded configuration from {}", config_manager.path().display());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cleaning up");
            trigger.cancel();
        }
    });

    match cli.command {
        Commands::Add(args) => stowage::cli::commands::add_copy(Verb::Add, args, false, &config, cancel).await,
        Commands::Copy(args) => {
            stowage::cli::commands::add_copy(Verb::Copy, args.common, args.parents, &config, cancel).await
        }
        Commands::History(args) => stowage::cli::commands::history(args, &config).await,
    }
}
