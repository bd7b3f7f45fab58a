//! Statistics generation from the run ledger
//!
//! This module provides functionality for extracting and displaying
//! run statistics from the storage layer.

use crate::storage::{RunRecord, Storage, StoreOutcome, StoreResultRecord};
use crate::SweepError;

/// Summary of one recorded run
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub run: RunRecord,

    /// Per-store results in visiting order
    pub stores: Vec<StoreResultRecord>,

    /// Products appended by the run
    pub total_emitted: u64,

    /// Wall-clock duration if the run finished
    pub duration_seconds: Option<u64>,
}

impl RunStatistics {
    pub fn stores_completed(&self) -> usize {
        self.stores
            .iter()
            .filter(|s| s.outcome == StoreOutcome::Completed)
            .count()
    }

    pub fn stores_abandoned(&self) -> usize {
        self.stores
            .iter()
            .filter(|s| s.outcome == StoreOutcome::Abandoned)
            .count()
    }

    pub fn failed_categories(&self) -> usize {
        self.stores.iter().map(|s| s.failed_categories.len()).sum()
    }
}

/// Loads statistics of the latest run
///
/// # Arguments
///
/// * `storage` - The storage backend to query
///
/// # Returns
///
/// * `Ok(Some(RunStatistics))` - Statistics of the most recent run
/// * `Ok(None)` - The ledger holds no runs
/// * `Err(SweepError)` - Failed to query statistics
pub fn load_statistics(storage: &dyn Storage) -> Result<Option<RunStatistics>, SweepError> {
    let Some(run) = storage.get_latest_run()? else {
        return Ok(None);
    };

    let stores = storage.get_store_results(run.id)?;
    let total_emitted = storage.count_emitted(run.id)?;

    let duration_seconds = match (
        run.started_at.parse::<chrono::DateTime<chrono::Utc>>(),
        run.finished_at
            .as_deref()
            .map(str::parse::<chrono::DateTime<chrono::Utc>>),
    ) {
        (Ok(started), Some(Ok(finished))) => Some((finished - started).num_seconds().max(0) as u64),
        _ => None,
    };

    Ok(Some(RunStatistics {
        run,
        stores,
        total_emitted,
        duration_seconds,
    }))
}

/// Prints statistics to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
pub fn print_statistics(stats: &RunStatistics) {
    println!("=== Run Statistics ===\n");

    println!("Run #{}:", stats.run.id);
    println!("  Status: {}", stats.run.status.to_db_string());
    println!("  Started: {}", stats.run.started_at);
    if let Some(finished) = &stats.run.finished_at {
        println!("  Finished: {}", finished);
    }
    if let Some(secs) = stats.duration_seconds {
        println!("  Duration: {}s", secs);
    }
    println!("  Config hash: {}", stats.run.config_hash);
    println!();

    println!("Overview:");
    println!("  Products emitted: {}", stats.total_emitted);
    println!("  Stores completed: {}", stats.stores_completed());
    println!("  Stores abandoned: {}", stats.stores_abandoned());
    println!("  Failed categories: {}", stats.failed_categories());
    println!();

    if !stats.stores.is_empty() {
        println!("Stores:");
        for store in &stats.stores {
            println!(
                "  [{}] {}: {} ({} products)",
                store.store_index,
                store.store_name,
                store.outcome.to_db_string(),
                store.emitted
            );
            if !store.failed_categories.is_empty() {
                println!("      failed: {}", store.failed_categories.join(", "));
            }
            if let Some(message) = &store.error_message {
                println!("      error: {}", message);
            }
        }
    }
}
