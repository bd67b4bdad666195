//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP server configuration
///
/// The host and port are also baked into the progress callback URL handed
/// to each spawned encoder process, so they must be reachable from wherever
/// ffmpeg runs (normally the same machine).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP server binds to (default "127.0.0.1")
    #[serde(default = "default_host")]
    pub host: String,
    /// Port the HTTP server binds to (default 6439)
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6439
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite connection URL, shared with the host application
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "sqlite://shrinkd.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

/// External encoder configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary (default "ffmpeg", resolved via PATH)
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - SHRINKD_HOST -> server.host
    /// - SHRINKD_PORT -> server.port
    /// - SHRINKD_DATABASE_URL -> database.url
    /// - SHRINKD_FFMPEG_PATH -> encoder.ffmpeg_path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("SHRINKD_HOST") {
            if !val.is_empty() {
                self.server.host = val;
            }
        }

        if let Ok(val) = env::var("SHRINKD_PORT") {
            if let Ok(port) = val.parse::<u16>() {
                self.server.port = port;
            }
        }

        if let Ok(val) = env::var("SHRINKD_DATABASE_URL") {
            if !val.is_empty() {
                self.database.url = val;
            }
        }

        if let Ok(val) = env::var("SHRINKD_FFMPEG_PATH") {
            if !val.is_empty() {
                self.encoder.ffmpeg_path = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}
