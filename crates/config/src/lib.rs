//! Configuration module for the shrinkd re-encode daemon
//!
//! Handles loading configuration from TOML files and environment variable overrides.

pub mod config;

pub use config::*;
