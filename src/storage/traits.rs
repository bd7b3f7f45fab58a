//! Storage traits and error types
//!
//! This module defines the trait interface for the run ledger and
//! associated error types.

use crate::storage::{RunRecord, StoreResultRecord};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for run ledger backends
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run in the `running` state
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn create_run(&mut self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run
    fn get_latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Marks a run as completed with a finish timestamp
    fn complete_run(&mut self, run_id: i64) -> StorageResult<()>;

    /// Marks a run as failed with a finish timestamp
    fn fail_run(&mut self, run_id: i64) -> StorageResult<()>;

    // ===== Store Results =====

    /// Records how one store went
    fn record_store_result(&mut self, run_id: i64, result: &StoreResultRecord)
        -> StorageResult<()>;

    /// Gets the store results of a run, in the order they were recorded
    fn get_store_results(&self, run_id: i64) -> StorageResult<Vec<StoreResultRecord>>;

    // ===== Statistics =====

    /// Total products emitted by a run
    fn count_emitted(&self, run_id: i64) -> StorageResult<u64>;
}
