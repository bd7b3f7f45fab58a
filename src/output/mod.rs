//! Output module for the dataset and run reports
//!
//! This module handles:
//! - Appending product rows to the CSV dataset
//! - Summarising runs recorded in the ledger

mod csv_sink;
pub mod stats;

pub use csv_sink::{CsvSink, Sink};
pub use stats::{load_statistics, print_statistics, RunStatistics};

use thiserror::Error;

/// Errors that can occur while writing the dataset
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
