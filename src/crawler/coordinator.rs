//! Crawler coordinator - top-level harvest orchestration
//!
//! This module contains the store loop that coordinates the whole run:
//! - Opening the ledger, checkpoint and dataset
//! - Seeding the deduplicator from the dataset
//! - Obtaining the first session
//! - Walking stores from the checkpoint, retrying or abandoning them
//! - Recording per-store outcomes in the ledger

use crate::client::{
    build_http_client, ApiEndpoint, Pause, RateLimitedClient, RetryPolicies, TokioPause,
};
use crate::config::{load_config_with_hash, Config, StoreEntry};
use crate::crawler::walker::{CatalogWalker, StoreError, WalkSettings};
use crate::output::{CsvSink, Sink};
use crate::session::{authenticator_from_config, Authenticator, SessionError, SessionManager};
use crate::state::{CheckpointStore, CrawlCursor, Deduplicator, JsonCheckpoint};
use crate::storage::{SqliteStorage, Storage, StoreOutcome, StoreResultRecord};
use crate::SweepError;
use std::path::Path;
use std::sync::Arc;

/// Totals of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub stores_completed: usize,
    pub stores_abandoned: usize,
    pub products_emitted: u64,
    pub categories_failed: usize,
}

/// Collaborators a [`Coordinator`] is assembled from
///
/// [`Coordinator::new`] builds the production set from the configuration; tests
/// substitute their own authenticator, pause or stores.
pub struct Components {
    pub authenticator: Box<dyn Authenticator>,
    pub pause: Arc<dyn Pause>,
    pub storage: Box<dyn Storage>,
    pub checkpoint: Box<dyn CheckpointStore>,
    pub sink: Box<dyn Sink>,
}

impl Components {
    /// Production collaborators described by the configuration
    pub fn from_config(config: &Config) -> Result<Self, SweepError> {
        let authenticator = authenticator_from_config(&config.auth).map_err(SessionError::from)?;
        let storage = SqliteStorage::new(Path::new(&config.output.ledger_path))?;
        let sink = CsvSink::open(&config.output.dataset_path)?;

        Ok(Self {
            authenticator,
            pause: Arc::new(TokioPause),
            storage: Box::new(storage),
            checkpoint: Box::new(JsonCheckpoint::new(&config.output.checkpoint_path)),
            sink: Box::new(sink),
        })
    }
}

/// Main harvest coordinator structure
pub struct Coordinator {
    stores: Vec<StoreEntry>,
    max_store_attempts: u32,
    walker: CatalogWalker,
    storage: Box<dyn Storage>,
    run_id: i64,
}

impl Coordinator {
    /// Creates a new coordinator instance
    ///
    /// # Arguments
    ///
    /// * `config` - The harvester configuration
    /// * `config_hash` - Hash of the configuration file, stored with the run
    /// * `fresh` - Whether to discard the checkpoint (the dataset is kept)
    ///
    /// # Returns
    ///
    /// * `Ok(Coordinator)` - Successfully created coordinator
    /// * `Err(SweepError)` - Failed to initialize
    pub fn new(config: Config, config_hash: &str, fresh: bool) -> Result<Self, SweepError> {
        let components = Components::from_config(&config)?;
        Self::with_components(config, components, config_hash, fresh)
    }

    /// Creates a coordinator from explicit collaborators
    pub fn with_components(
        config: Config,
        components: Components,
        config_hash: &str,
        fresh: bool,
    ) -> Result<Self, SweepError> {
        let Components {
            authenticator,
            pause,
            mut storage,
            mut checkpoint,
            sink,
        } = components;

        if fresh {
            tracing::info!("Fresh start requested, discarding checkpoint");
            checkpoint.reset()?;
        }

        let dedup = Deduplicator::from_ids(sink.existing_ids()?);
        tracing::info!("Dataset already holds {} products", dedup.len());

        let http = build_http_client(&config.crawler)?;
        let endpoint = ApiEndpoint::new(http, &config.api.base_url)?;
        let session = SessionManager::new(
            authenticator,
            endpoint.clone(),
            &config.api,
            &config.crawler,
            pause.clone(),
        )?;
        let client = RateLimitedClient::new(
            endpoint,
            session,
            RetryPolicies::from_config(&config.crawler),
            pause,
        );
        let walker = CatalogWalker::new(
            client,
            sink,
            checkpoint,
            dedup,
            WalkSettings::from_config(&config),
        );

        let run_id = storage.create_run(config_hash)?;
        tracing::info!("Starting run {}", run_id);

        Ok(Self {
            stores: config.stores,
            max_store_attempts: config.crawler.max_store_attempts,
            walker,
            storage,
            run_id,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.run_id
    }

    pub fn walker(&self) -> &CatalogWalker {
        &self.walker
    }

    /// Runs the store loop
    ///
    /// The run is marked completed when the loop ends, or failed when it stops
    /// early (no initial session, or a local write failure).
    pub async fn run(&mut self) -> Result<RunSummary, SweepError> {
        match self.run_stores().await {
            Ok(summary) => {
                self.storage.complete_run(self.run_id)?;
                tracing::info!(
                    "Run {} complete: {} stores completed, {} abandoned, {} products emitted",
                    self.run_id,
                    summary.stores_completed,
                    summary.stores_abandoned,
                    summary.products_emitted
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Run {} failed: {}", self.run_id, e);
                if let Err(ledger_error) = self.storage.fail_run(self.run_id) {
                    tracing::error!("Could not mark run {} failed: {}", self.run_id, ledger_error);
                }
                Err(e)
            }
        }
    }

    async fn run_stores(&mut self) -> Result<RunSummary, SweepError> {
        let mut cursor = self.walker.load_checkpoint();
        tracing::info!(
            "Resuming at store {} category {} (marker {:?})",
            cursor.store_index,
            cursor.category_index,
            cursor.last_emitted_product_id
        );

        self.walker
            .client_mut()
            .session_mut()
            .ensure_valid()
            .await
            .map_err(SweepError::Authentication)?;

        let mut summary = RunSummary::default();
        let stores = self.stores.clone();
        for (store_index, store) in stores.iter().enumerate().skip(cursor.store_index) {
            if cursor.store_index != store_index {
                cursor = CrawlCursor::new(store_index, 0, None);
            }
            tracing::info!("Store {}/{}: {}", store_index + 1, stores.len(), store.name);

            let record = self.visit_store(store_index, store, &mut cursor).await?;
            match record.outcome {
                StoreOutcome::Completed => summary.stores_completed += 1,
                StoreOutcome::Abandoned => summary.stores_abandoned += 1,
            }
            summary.products_emitted += record.emitted;
            summary.categories_failed += record.failed_categories.len();
            self.storage.record_store_result(self.run_id, &record)?;

            cursor = cursor.store_done();
            self.walker.save_checkpoint(&cursor)?;
        }

        Ok(summary)
    }

    /// Walks one store, retrying it while the failure allows
    ///
    /// Only local persistence failures escape as errors; everything else ends
    /// in a completed or abandoned record.
    async fn visit_store(
        &mut self,
        store_index: usize,
        store: &StoreEntry,
        cursor: &mut CrawlCursor,
    ) -> Result<StoreResultRecord, SweepError> {
        let emitted_before = self.walker.emitted_total();
        let record = |outcome: StoreOutcome,
                      failed_categories: Vec<String>,
                      error_message: Option<String>,
                      emitted: u64| StoreResultRecord {
            store_index,
            store_name: store.name.clone(),
            emitted,
            failed_categories,
            outcome,
            error_message,
        };

        if let Err(e) = self.walker.client_mut().session_mut().ensure_valid().await {
            tracing::error!("No session for store {}, abandoning it: {}", store.name, e);
            return Ok(record(StoreOutcome::Abandoned, Vec::new(), Some(e.to_string()), 0));
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let error = match self.walker.run_store(store_index, store, cursor).await {
                Ok(result) => {
                    return Ok(record(
                        StoreOutcome::Completed,
                        result.failed_categories,
                        None,
                        self.walker.emitted_total() - emitted_before,
                    ))
                }
                Err(e) if e.is_run_fatal() => return Err(e.into()),
                Err(e) => e,
            };

            let emitted = self.walker.emitted_total() - emitted_before;
            if !error.is_retryable() || attempts >= self.max_store_attempts {
                tracing::error!(
                    "Abandoning store {} after {} attempt(s): {}",
                    store.name,
                    attempts,
                    error
                );
                return Ok(record(
                    StoreOutcome::Abandoned,
                    Vec::new(),
                    Some(error.to_string()),
                    emitted,
                ));
            }

            tracing::warn!(
                "Store {} failed ({}), refreshing session for attempt {}/{}",
                store.name,
                error,
                attempts + 1,
                self.max_store_attempts
            );
            if let Err(e) = self.walker.client_mut().session_mut().refresh().await {
                let error = StoreError::Session(e);
                tracing::error!("Abandoning store {}: {}", store.name, error);
                return Ok(record(
                    StoreOutcome::Abandoned,
                    Vec::new(),
                    Some(error.to_string()),
                    emitted,
                ));
            }
        }
    }
}

/// Loads the configuration at `config_path` and runs a complete harvest
///
/// # Arguments
///
/// * `config_path` - Path to the TOML configuration
/// * `fresh` - Whether to discard the checkpoint first
///
/// # Returns
///
/// * `Ok(RunSummary)` - The run finished (possibly with abandoned stores)
/// * `Err(SweepError)` - The run could not start or stopped early
pub async fn run_crawl(config_path: &Path, fresh: bool) -> Result<RunSummary, SweepError> {
    let (config, config_hash) = load_config_with_hash(config_path)?;
    let mut coordinator = Coordinator::new(config, &config_hash, fresh)?;
    coordinator.run().await
}
