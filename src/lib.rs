//! Aisle-Sweep: a checkpointed catalog harvester
//!
//! This crate walks a commerce platform's catalog store by store
//! (store → category → product batch), keeps a single authenticated session alive
//! under aggressive rate limiting, and appends every product exactly once to a
//! tabular dataset. Interrupted runs resume from a persisted cursor.

pub mod catalog;
pub mod client;
pub mod config;
pub mod crawler;
pub mod output;
pub mod session;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Aisle-Sweep operations
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed before any session was obtained: {0}")]
    Authentication(#[source] session::SessionError),

    #[error("Session error: {0}")]
    Session(#[from] session::SessionError),

    #[error("Request error: {0}")]
    Request(#[from] client::RequestError),

    #[error("Store visit failed: {0}")]
    Store(#[from] crawler::StoreError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] state::CheckpointError),

    #[error("Dataset error: {0}")]
    Sink(#[from] output::SinkError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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

/// Result type alias for Aisle-Sweep operations
pub type Result<T> = std::result::Result<T, SweepError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use catalog::{CatalogNode, Product, ProductRecord};
pub use config::Config;
pub use crawler::{Coordinator, RunSummary};
pub use state::{CrawlCursor, Deduplicator};
