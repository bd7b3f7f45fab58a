//! Store traversal
//!
//! A store is walked leaf category by leaf category, in menu order. Each leaf is
//! one unit of work: fetch the product batch, drop what the dataset already has,
//! append the rest, then advance the checkpoint.

use crate::catalog::{
    canonical_id, extract_items, format_captured_at, leaf_categories, resume_after,
    store_tree_path, CatalogError, CatalogNode, ProductContext, ProductRecord,
};
use crate::client::{RateLimitedClient, RequestError, RequestSpec};
use crate::config::{Config, ScalarId, StoreEntry};
use crate::output::{Sink, SinkError};
use crate::session::SessionError;
use crate::state::{CheckpointError, CheckpointStore, CrawlCursor, Deduplicator};
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a store visit early
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Could not fetch the category tree: {0}")]
    Tree(#[source] RequestError),

    #[error("Session lost: {0}")]
    Session(#[from] SessionError),

    #[error("Dataset write failed: {0}")]
    Sink(#[from] SinkError),

    #[error("Checkpoint write failed: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl StoreError {
    /// Worth another attempt after a session refresh
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Tree(e) if !e.is_fatal())
    }

    /// Local persistence failed; continuing would break the checkpoint guarantees
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Sink(_) | Self::Checkpoint(_))
    }
}

/// Outcome of a completed store visit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreResult {
    pub emitted_count: u64,
    /// Leaf categories given up on, in menu order
    pub failed_categories: Vec<String>,
}

/// Knobs the walker reads from the configuration
#[derive(Debug, Clone)]
pub struct WalkSettings {
    pub batch_size: u64,
    pub category_pause: Duration,
    pub max_rate_limit_rounds: u32,
    pub product_widgets: Vec<String>,
    pub source_file_id: Option<ScalarId>,
    pub utc_offset_hours: i32,
}

impl WalkSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.crawler.batch_size,
            category_pause: Duration::from_millis(config.crawler.category_pause_ms),
            max_rate_limit_rounds: config.crawler.max_rate_limit_rounds,
            product_widgets: config.api.product_widgets.clone(),
            source_file_id: config.output.source_file_id.clone(),
            utc_offset_hours: config.output.utc_offset_hours,
        }
    }
}

#[derive(Debug)]
enum CategoryError {
    Request(RequestError),
    Malformed(CatalogError),
    Sink(SinkError),
}

/// A category attempt that stopped early, with what it managed to emit
#[derive(Debug)]
struct CategoryFailure {
    emitted: u64,
    error: CategoryError,
}

impl CategoryFailure {
    fn before_emitting(error: CategoryError) -> Self {
        Self { emitted: 0, error }
    }
}

/// Walks stores through the [`RateLimitedClient`] it owns
pub struct CatalogWalker {
    client: RateLimitedClient,
    sink: Box<dyn Sink>,
    checkpoint: Box<dyn CheckpointStore>,
    dedup: Deduplicator,
    settings: WalkSettings,
    emitted_total: u64,
}

impl CatalogWalker {
    pub fn new(
        client: RateLimitedClient,
        sink: Box<dyn Sink>,
        checkpoint: Box<dyn CheckpointStore>,
        dedup: Deduplicator,
        settings: WalkSettings,
    ) -> Self {
        Self {
            client,
            sink,
            checkpoint,
            dedup,
            settings,
            emitted_total: 0,
        }
    }

    pub fn client(&self) -> &RateLimitedClient {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut RateLimitedClient {
        &mut self.client
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }

    /// Products appended since the walker was created
    pub fn emitted_total(&self) -> u64 {
        self.emitted_total
    }

    pub fn load_checkpoint(&self) -> CrawlCursor {
        self.checkpoint.load()
    }

    pub fn save_checkpoint(&mut self, cursor: &CrawlCursor) -> Result<(), CheckpointError> {
        self.checkpoint.save(cursor)
    }

    /// Harvests every leaf category of one store
    ///
    /// Starts at `cursor.category_index`, honouring the resume marker for that
    /// first category. The checkpoint is saved after every category; the caller
    /// saves the store-level advance.
    ///
    /// # Arguments
    ///
    /// * `store_index` - Position of the store in the configured list
    /// * `store` - The store to walk
    /// * `cursor` - Current position, updated in place
    ///
    /// # Returns
    ///
    /// * `Ok(StoreResult)` - Every leaf was harvested or given up on
    /// * `Err(StoreError)` - The tree could not be fetched, the session was lost,
    ///   or local persistence failed
    pub async fn run_store(
        &mut self,
        store_index: usize,
        store: &StoreEntry,
        cursor: &mut CrawlCursor,
    ) -> Result<StoreResult, StoreError> {
        if cursor.store_index != store_index {
            *cursor = CrawlCursor::new(store_index, 0, None);
        }

        let tree = match self
            .client
            .get_json(&RequestSpec::new(store_tree_path(&store.link)))
            .await
        {
            Ok(tree) => tree,
            Err(RequestError::Malformed { url, message }) => {
                tracing::warn!("Category tree at {} is not JSON ({}), no leaves", url, message);
                serde_json::Value::Null
            }
            Err(e) => return Err(StoreError::Tree(e)),
        };
        let leaves = leaf_categories(&tree);
        tracing::info!(
            "Store {} has {} leaf categories, starting at {}",
            store.name,
            leaves.len(),
            cursor.category_index
        );

        let mut result = StoreResult::default();
        while let Some(leaf) = leaves.get(cursor.category_index) {
            tracing::info!(
                "Category {}/{}: {} > {}",
                cursor.category_index + 1,
                leaves.len(),
                leaf.parent_name,
                leaf.name
            );
            let emitted = self.run_category(store, leaf, cursor, &mut result).await?;
            result.emitted_count += emitted;
        }

        tracing::info!(
            "Store {} done: {} products emitted, {} categories failed",
            store.name,
            result.emitted_count,
            result.failed_categories.len()
        );
        Ok(result)
    }

    /// Harvests one leaf, retrying it as the failure class allows
    async fn run_category(
        &mut self,
        store: &StoreEntry,
        leaf: &CatalogNode,
        cursor: &mut CrawlCursor,
        result: &mut StoreResult,
    ) -> Result<u64, StoreError> {
        let mut emitted = 0;
        let mut rate_limit_rounds = 0;
        let mut retried = false;

        loop {
            let failure = match self.harvest_category(store, leaf, cursor).await {
                Ok(count) => {
                    emitted += count;
                    *cursor = cursor.category_done();
                    self.checkpoint.save(cursor)?;
                    return Ok(emitted);
                }
                Err(failure) => failure,
            };

            emitted += failure.emitted;
            self.checkpoint.save(cursor)?;

            let error = match failure.error {
                CategoryError::Sink(e) => return Err(StoreError::Sink(e)),
                CategoryError::Request(RequestError::Session(e)) => {
                    return Err(StoreError::Session(e))
                }
                CategoryError::Request(e) if e.is_rate_limited() => {
                    if rate_limit_rounds < self.settings.max_rate_limit_rounds {
                        rate_limit_rounds += 1;
                        tracing::warn!(
                            "Category {} rate limited (round {}/{}), refreshing session",
                            leaf.name,
                            rate_limit_rounds,
                            self.settings.max_rate_limit_rounds
                        );
                        self.client.session_mut().refresh().await?;
                        continue;
                    }
                    e.to_string()
                }
                // The client already refreshed and replayed once
                CategoryError::Request(e @ RequestError::Unauthorized { .. }) => e.to_string(),
                CategoryError::Request(e) => {
                    if !retried {
                        retried = true;
                        tracing::warn!(
                            "Category {} failed ({}), refreshing and retrying",
                            leaf.name,
                            e
                        );
                        self.client.session_mut().refresh().await?;
                        continue;
                    }
                    e.to_string()
                }
                CategoryError::Malformed(e) => {
                    if !retried {
                        retried = true;
                        tracing::warn!(
                            "Category {} returned a malformed item ({}), refreshing and retrying",
                            leaf.name,
                            e
                        );
                        self.client.session_mut().refresh().await?;
                        continue;
                    }
                    e.to_string()
                }
            };

            tracing::error!("Giving up on category {}: {}", leaf.name, error);
            result.failed_categories.push(leaf.name.clone());
            *cursor = cursor.category_done();
            self.checkpoint.save(cursor)?;
            return Ok(emitted);
        }
    }

    /// One attempt at a leaf
    ///
    /// On success or failure alike, `cursor.last_emitted_product_id` names the
    /// last record appended so far for this leaf.
    async fn harvest_category(
        &mut self,
        store: &StoreEntry,
        leaf: &CatalogNode,
        cursor: &mut CrawlCursor,
    ) -> Result<u64, CategoryFailure> {
        if !self.settings.category_pause.is_zero() {
            self.client.pause_for(self.settings.category_pause).await;
        }

        let spec = RequestSpec::new(leaf.request_path())
            .with_query("skip", 0)
            .with_query("take", self.settings.batch_size);
        let page = self
            .client
            .get_json(&spec)
            .await
            .map_err(|e| CategoryFailure::before_emitting(CategoryError::Request(e)))?;

        let items = extract_items(&page, &self.settings.product_widgets);
        let candidates = resume_after(&items, cursor.last_emitted_product_id.as_deref());
        tracing::debug!(
            "{} items in {}, {} after the resume point",
            items.len(),
            leaf.name,
            candidates.len()
        );

        let context = ProductContext::new(store, leaf, self.settings.source_file_id.as_ref());
        let captured_at = format_captured_at(Utc::now(), self.settings.utc_offset_hours);

        let mut records = Vec::new();
        let mut batch_ids = HashSet::new();
        let mut malformed = None;
        for item in candidates {
            let id = match canonical_id(item) {
                Ok(id) => id,
                Err(e) => {
                    malformed = Some(e);
                    break;
                }
            };
            if self.dedup.seen(&id) || !batch_ids.insert(id) {
                continue;
            }
            match ProductRecord::from_item(item, &context, &captured_at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    malformed = Some(e);
                    break;
                }
            }
        }

        let emitted = self
            .emit(&records, cursor)
            .map_err(|e| CategoryFailure::before_emitting(CategoryError::Sink(e)))?;

        match malformed {
            Some(e) => Err(CategoryFailure {
                emitted,
                error: CategoryError::Malformed(e),
            }),
            None => Ok(emitted),
        }
    }

    /// Appends records, then marks them seen and moves the resume marker
    fn emit(
        &mut self,
        records: &[ProductRecord],
        cursor: &mut CrawlCursor,
    ) -> Result<u64, SinkError> {
        let Some(last) = records.last() else {
            return Ok(0);
        };
        self.sink.append(records)?;
        for record in records {
            self.dedup.mark(record.id.clone());
        }
        cursor.last_emitted_product_id = Some(last.id.clone());
        self.emitted_total += records.len() as u64;
        tracing::debug!("Appended {} products", records.len());
        Ok(records.len() as u64)
    }
}
