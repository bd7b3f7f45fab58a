//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `CrawlCursor`: Where the crawl stands (store, category, last emitted product)
//! - `CheckpointStore`: Durable storage for the cursor (`JsonCheckpoint` on disk)
//! - `Deduplicator`: Ids already written to the dataset

mod cursor;
mod seen;

// Re-export main types
pub use cursor::{CheckpointError, CheckpointStore, CrawlCursor, JsonCheckpoint, MemoryCheckpoint};
pub use seen::Deduplicator;
