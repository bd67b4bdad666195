//! Daemon startup and wiring.
//!
//! Connects the shared database, applies the encode-side schema, constructs
//! the scheduler, and runs the HTTP server alongside the startup resume pass.

use crate::ledger::Ledger;
use crate::scheduler::Scheduler;
use crate::server::{run_server, ServerError};
use shrinkd_config::{Config, ConfigError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    scheduler: Arc<Scheduler>,
}

impl Daemon {
    /// Initialize the daemon with configuration from file
    ///
    /// Loads config.toml, applies environment overrides, connects the
    /// database (creating the file if missing), and applies the encode-side
    /// schema.
    pub async fn new<P: AsRef<Path>>(config_path: P) -> Result<Self, DaemonError> {
        let config = Config::load(config_path)?;
        Self::with_config(config).await
    }

    /// Initialize the daemon with an existing configuration
    pub async fn with_config(config: Config) -> Result<Self, DaemonError> {
        let options =
            SqliteConnectOptions::from_str(&config.database.url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::with_pool(config, pool).await
    }

    /// Initialize the daemon over an already-connected pool
    ///
    /// Useful for testing or when the host application owns the pool.
    pub async fn with_pool(config: Config, pool: SqlitePool) -> Result<Self, DaemonError> {
        let ledger = Ledger::new(pool);
        ledger.ensure_schema().await?;

        let scheduler = Arc::new(Scheduler::new(ledger, config.clone()));
        Ok(Self { config, scheduler })
    }

    /// Shared handle to the scheduler
    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    /// Start the resume pass as a background task
    ///
    /// Re-submits jobs left unfinished by a previous run through the normal
    /// admission path.
    pub fn start_resume(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler.resume().await;
        })
    }

    /// Run the daemon: resume interrupted work, then serve the HTTP routes
    pub async fn run_with_server(&self) -> Result<(), DaemonError> {
        info!(
            host = %self.config.server.host,
            port = self.config.server.port,
            "starting encode daemon"
        );

        let _resume_handle = self.start_resume();

        run_server(self.scheduler.clone(), &self.config.server).await?;
        Ok(())
    }
}
