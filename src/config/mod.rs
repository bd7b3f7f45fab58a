//! Configuration module for Aisle-Sweep
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use aisle_sweep::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sweep.toml")).unwrap();
//! println!("Harvesting {} stores", config.stores.len());
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ApiConfig, AuthConfig, Config, CrawlerConfig, OutputConfig, ScalarId, StoreEntry,
};

pub use validation::MAX_VALIDATION_INTERVAL_SECS;

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
