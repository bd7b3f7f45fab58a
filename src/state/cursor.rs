//! Persisted crawl cursor
//!
//! The cursor is overwritten wholesale after every unit of work. Writes go to a
//! temporary file in the same directory which is synced and renamed over the
//! previous checkpoint, so a crash leaves either the old or the new cursor.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Errors raised while persisting the cursor
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Position of the crawl
///
/// `store_index` only advances; `category_index` restarts at 0 for each store;
/// `last_emitted_product_id` is set only while a category is partially emitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCursor {
    pub store_index: usize,
    pub category_index: usize,
    #[serde(rename = "last_processed_product_id", default)]
    pub last_emitted_product_id: Option<String>,
}

impl CrawlCursor {
    pub fn new(
        store_index: usize,
        category_index: usize,
        last_emitted_product_id: Option<String>,
    ) -> Self {
        Self {
            store_index,
            category_index,
            last_emitted_product_id,
        }
    }

    /// Cursor after a category finished (or was given up on)
    pub fn category_done(&self) -> Self {
        Self::new(self.store_index, self.category_index + 1, None)
    }

    /// Cursor after a store finished (or was abandoned)
    pub fn store_done(&self) -> Self {
        Self::new(self.store_index + 1, 0, None)
    }
}

/// Durable home of the [`CrawlCursor`]
pub trait CheckpointStore: Send {
    /// Loads the cursor; absent or unreadable checkpoints yield the start cursor
    fn load(&self) -> CrawlCursor;

    /// Atomically replaces the stored cursor
    fn save(&mut self, cursor: &CrawlCursor) -> Result<(), CheckpointError>;

    /// Forgets the stored cursor
    fn reset(&mut self) -> Result<(), CheckpointError>;
}

/// Checkpoint kept as a JSON file
#[derive(Debug, Clone)]
pub struct JsonCheckpoint {
    path: PathBuf,
}

impl JsonCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl CheckpointStore for JsonCheckpoint {
    fn load(&self) -> CrawlCursor {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(
                    "No checkpoint at {}, starting from the beginning",
                    self.path.display()
                );
                return CrawlCursor::default();
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read checkpoint {}: {}; starting from the beginning",
                    self.path.display(),
                    e
                );
                return CrawlCursor::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!(
                    "Corrupt checkpoint {}: {}; starting from the beginning",
                    self.path.display(),
                    e
                );
                CrawlCursor::default()
            }
        }
    }

    fn save(&mut self, cursor: &CrawlCursor) -> Result<(), CheckpointError> {
        let dir = self.directory();
        fs::create_dir_all(&dir)?;

        let content = serde_json::to_string_pretty(cursor)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;
        tmp.persist(&self.path).map_err(|e| CheckpointError::Io(e.error))?;

        tracing::debug!(
            "Checkpoint saved: store {} category {} last {:?}",
            cursor.store_index,
            cursor.category_index,
            cursor.last_emitted_product_id
        );
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CheckpointError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Checkpoint {} removed", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory checkpoint that keeps every saved cursor
///
/// Clones share the same history, so a caller can hand one clone to the crawl
/// and inspect the other afterwards.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpoint {
    history: Arc<Mutex<Vec<CrawlCursor>>>,
}

impl MemoryCheckpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing cursor
    pub fn starting_at(cursor: CrawlCursor) -> Self {
        Self {
            history: Arc::new(Mutex::new(vec![cursor])),
        }
    }

    /// Every cursor saved so far, oldest first
    pub fn history(&self) -> Vec<CrawlCursor> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> CrawlCursor {
        self.history
            .lock()
            .ok()
            .and_then(|history| history.last().cloned())
            .unwrap_or_default()
    }

    fn save(&mut self, cursor: &CrawlCursor) -> Result<(), CheckpointError> {
        if let Ok(mut history) = self.history.lock() {
            history.push(cursor.clone());
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CheckpointError> {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_checkpoint_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let checkpoint = JsonCheckpoint::new(dir.path().join("checkpoint.json"));
        assert_eq!(checkpoint.load(), CrawlCursor::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let mut checkpoint = JsonCheckpoint::new(dir.path().join("checkpoint.json"));
        let cursor = CrawlCursor::new(2, 5, Some("P-9".to_string()));

        checkpoint.save(&cursor).unwrap();
        assert_eq!(checkpoint.load(), cursor);

        checkpoint.save(&cursor.category_done()).unwrap();
        assert_eq!(checkpoint.load(), CrawlCursor::new(2, 6, None));
    }

    #[test]
    fn test_file_uses_wire_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = JsonCheckpoint::new(&path);
        checkpoint
            .save(&CrawlCursor::new(1, 3, Some("42".to_string())))
            .unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["store_index"], 1);
        assert_eq!(raw["category_index"], 3);
        assert_eq!(raw["last_processed_product_id"], "42");
    }

    #[test]
    fn test_reads_null_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(
            &path,
            r#"{"store_index": 4, "category_index": 0, "last_processed_product_id": null}"#,
        )
        .unwrap();
        assert_eq!(JsonCheckpoint::new(&path).load(), CrawlCursor::new(4, 0, None));
    }

    #[test]
    fn test_corrupt_checkpoint_starts_at_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        fs::write(&path, "{not json").unwrap();
        assert_eq!(JsonCheckpoint::new(&path).load(), CrawlCursor::default());
    }

    #[test]
    fn test_reset_removes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut checkpoint = JsonCheckpoint::new(&path);
        checkpoint.save(&CrawlCursor::new(3, 1, None)).unwrap();

        checkpoint.reset().unwrap();
        assert!(!path.exists());
        assert_eq!(checkpoint.load(), CrawlCursor::default());
        // Resetting twice is fine
        checkpoint.reset().unwrap();
    }

    #[test]
    fn test_cursor_transitions() {
        let cursor = CrawlCursor::new(1, 4, Some("x".to_string()));
        assert_eq!(cursor.category_done(), CrawlCursor::new(1, 5, None));
        assert_eq!(cursor.store_done(), CrawlCursor::new(2, 0, None));
    }

    #[test]
    fn test_memory_checkpoint_history() {
        let mut checkpoint = MemoryCheckpoint::starting_at(CrawlCursor::new(1, 0, None));
        checkpoint.save(&CrawlCursor::new(1, 1, None)).unwrap();
        assert_eq!(checkpoint.load(), CrawlCursor::new(1, 1, None));
        assert_eq!(checkpoint.history().len(), 2);

        let observer = checkpoint.clone();
        checkpoint.save(&CrawlCursor::new(2, 0, None)).unwrap();
        assert_eq!(observer.load(), CrawlCursor::new(2, 0, None));
    }
}
