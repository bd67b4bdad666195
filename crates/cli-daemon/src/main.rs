//! CLI entry point for the shrinkd re-encode daemon
//!
//! Parses command line arguments and starts the daemon.

use clap::Parser;
use shrinkd::Daemon;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// shrinkd - post-download media re-encoding with a bounded job queue
#[derive(Parser, Debug)]
#[command(name = "shrinkd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let daemon = match Daemon::new(&args.config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(config = %args.config.display(), "failed to initialize daemon: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = daemon.run_with_server().await {
        error!("daemon error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
