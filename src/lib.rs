//! Video-Harvest: a polling ingester for an upstream video-search API
//!
//! This crate periodically polls a search endpoint for tracked queries,
//! walks its continuation tokens, rotates API credentials on quota
//! exhaustion, deduplicates items and serves them through a paginated
//! read API.

pub mod api;
pub mod config;
pub mod ingest;
pub mod output;
pub mod schedule;
pub mod storage;

use thiserror::Error;

/// Main error type for Video-Harvest operations
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

// Re-export commonly used types
pub use config::Config;
pub use ingest::{CycleOutcome, FetchCycle};
pub use storage::{Item, NewItem, SharedStorage, SqliteStorage, Storage};
