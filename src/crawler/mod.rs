//! Crawler module for catalog traversal
//!
//! This module contains the core harvesting logic, including:
//! - Walking a store's leaf categories and emitting product batches
//! - Per-category and per-store retry decisions
//! - Overall run coordination against the checkpoint and ledger

mod coordinator;
mod walker;

pub use coordinator::{run_crawl, Components, Coordinator, RunSummary};
pub use walker::{CatalogWalker, StoreError, StoreResult, WalkSettings};
