//! Wick Engine Server - Headless wick collector
//!
//! Streams OKX trades and order books, polls context sources, detects wicks
//! and appends one JSONL record per event. Metrics are pushed via structured
//! JSON lines to stdout.
//!
//! # Usage
//! ```sh
//! OKX_SYMBOLS=BTC-USDT,ETH-USDT cargo run --bin server -- --output-dir data
//! ```
//!
//! # Environment Variables
//! See the `config` module for the full list.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;
use wickengine::application::system::Application;
use wickengine::config::Config;

#[derive(Parser, Debug)]
#[command(name = "server", version, about = "Crypto wick detection engine")]
struct Args {
    /// Directory for JSONL segments (overrides OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Comma-separated OKX instrument ids (overrides OKX_SYMBOLS)
    #[arg(long, value_delimiter = ',')]
    symbols: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Wick Engine: fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Wick Engine Server {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = args.output_dir {
        config.storage.output_dir = dir;
    }
    if let Some(symbols) = args.symbols {
        config.feeds.symbols = symbols
            .into_iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    let grace = Duration::from_secs(config.storage.shutdown_grace_secs);

    let app = Application::build(config)?;
    let mut handle = app.start();
    info!("Server running. Press Ctrl+C to shutdown.");

    let failure = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Shutdown signal received. Draining...");
            None
        }
        // Storage only stops on its own when a write was exhausted
        stopped = handle.storage_stopped() => stopped.err(),
    };

    let drained = handle.shutdown(grace).await;
    if let Some(e) = failure {
        return Err(e);
    }
    drained?;
    info!("Wick Engine stopped.");
    Ok(())
}
