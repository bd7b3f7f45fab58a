//! Integration tests for the harvester
//!
//! These tests use wiremock to create a mock catalog API and run the
//! coordinator end-to-end against scratch files in a temporary directory.

use aisle_sweep::client::{Pause, RecordingPause};
use aisle_sweep::config::{
    ApiConfig, AuthConfig, Config, CrawlerConfig, OutputConfig, ScalarId, StoreEntry,
};
use aisle_sweep::crawler::{Components, Coordinator};
use aisle_sweep::output::CsvSink;
use aisle_sweep::session::{AuthError, Authenticator};
use aisle_sweep::state::{CheckpointStore, CrawlCursor, JsonCheckpoint};
use aisle_sweep::storage::{RunStatus, SqliteStorage, Storage, StoreOutcome};
use aisle_sweep::SweepError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Hands out numbered tokens and counts how often it was asked
struct CountingAuthenticator {
    calls: Arc<AtomicU32>,
    fail: bool,
}

#[async_trait]
impl Authenticator for CountingAuthenticator {
    async fn acquire_token(&self) -> Result<String, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            Err(AuthError::Command("sign-up flow crashed".to_string()))
        } else {
            Ok(format!("token-{}", n))
        }
    }
}

/// Mock API plus scratch files shared by one or more runs
struct Harness {
    server: MockServer,
    dir: TempDir,
    pause: Arc<RecordingPause>,
    acquisitions: Arc<AtomicU32>,
}

impl Harness {
    async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keepalive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        Self {
            server,
            dir: TempDir::new().expect("Failed to create temp dir"),
            pause: Arc::new(RecordingPause::new()),
            acquisitions: Arc::new(AtomicU32::new(0)),
        }
    }

    fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn config(&self) -> Config {
        Config {
            crawler: CrawlerConfig {
                max_retries: 3,
                base_delay_ms: 5_000,
                jitter: false,
                transient_retries: 1,
                transient_delay_ms: 1_000,
                max_rate_limit_rounds: 1,
                max_store_attempts: 2,
                category_pause_ms: 0,
                batch_size: 1_000,
                validation_interval_secs: 300,
                request_timeout_secs: 5,
            },
            api: ApiConfig {
                base_url: self.server.uri(),
                keep_alive_path: "keepalive".to_string(),
                origin: "https://it.example.com".to_string(),
                client_version: "website/8.4.1".to_string(),
                country: "ITA".to_string(),
                whitelabel: "it.example.com".to_string(),
                product_widgets: vec!["vertical-list".to_string()],
            },
            auth: AuthConfig {
                token: Some("unused".to_string()),
                ..AuthConfig::default()
            },
            output: OutputConfig {
                dataset_path: self.file("products.csv").to_string_lossy().to_string(),
                checkpoint_path: self.file("checkpoint.json").to_string_lossy().to_string(),
                ledger_path: self.file("sweep.db").to_string_lossy().to_string(),
                source_file_id: Some(ScalarId::Number(267162)),
                utc_offset_hours: 4,
            },
            stores: vec![store("Lidl", 1), store("Coop", 2)],
        }
    }

    fn coordinator_with(&self, config: Config, fail_auth: bool, fresh: bool) -> Coordinator {
        let pause: Arc<dyn Pause> = self.pause.clone();
        let components = Components {
            authenticator: Box::new(CountingAuthenticator {
                calls: self.acquisitions.clone(),
                fail: fail_auth,
            }),
            pause,
            storage: Box::new(
                SqliteStorage::new(&self.file("sweep.db")).expect("Failed to open ledger"),
            ),
            checkpoint: Box::new(JsonCheckpoint::new(self.file("checkpoint.json"))),
            sink: Box::new(
                CsvSink::open(self.file("products.csv")).expect("Failed to open dataset"),
            ),
        };
        Coordinator::with_components(config, components, "test-hash", fresh)
            .expect("Failed to create coordinator")
    }

    fn coordinator(&self) -> Coordinator {
        self.coordinator_with(self.config(), false, false)
    }

    async fn mount_json(&self, route: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    async fn mount_status(&self, route: &str, status: u16) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Two stores: Lidl with Fruit and Dairy, Coop with Bakery
    async fn mount_catalog(&self) {
        self.mount_json("/stores/1/categories/tree", tree(1, &["fruit", "dairy"])).await;
        self.mount_json("/stores/2/categories/tree", tree(2, &["bakery"])).await;
        self.mount_json(
            "/stores/1/fruit",
            page(json!([{"id": 1, "name": "Apple"}, {"id": 2, "name": "Pear"}])),
        )
        .await;
        self.mount_json(
            "/stores/1/dairy",
            page(json!([{"id": 2, "name": "Pear"}, {"id": 3, "name": "Milk"}])),
        )
        .await;
        self.mount_json("/stores/2/bakery", page(json!([{"id": 4, "name": "Bread"}]))).await;
    }

    async fn requests_to(&self, route: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.url.path() == route)
            .count()
    }

    fn dataset_ids(&self) -> Vec<String> {
        let mut reader =
            csv::Reader::from_path(self.file("products.csv")).expect("Failed to read dataset");
        let id_column = reader
            .headers()
            .unwrap()
            .iter()
            .position(|h| h == "id")
            .expect("Dataset has no id column");
        reader
            .records()
            .map(|row| row.unwrap()[id_column].to_string())
            .collect()
    }

    fn ledger(&self) -> SqliteStorage {
        SqliteStorage::new(&self.file("sweep.db")).expect("Failed to reopen ledger")
    }
}

fn store(name: &str, id: i64) -> StoreEntry {
    StoreEntry {
        name: name.to_string(),
        id: ScalarId::Number(id),
        link: format!("everli://app/stores/{}", id),
        area_id: Some(ScalarId::Number(1)),
        url_id: None,
        currency_id: None,
        country_id: None,
        src_id: None,
    }
}

fn tree(store_id: u32, leaves: &[&str]) -> Value {
    let branch: Vec<Value> = leaves
        .iter()
        .map(|leaf| json!({"name": leaf, "link": format!("#/stores/{}/{}", store_id, leaf)}))
        .collect();
    json!({"data": {"menu": [{"items": [
        {"name": "Aisles", "link": format!("#/stores/{}/aisles", store_id), "branch": branch}
    ]}]}})
}

fn page(items: Value) -> Value {
    json!({"data": {"body": [
        {"widget_type": "banner", "list": [{"id": "ad-1"}]},
        {"widget_type": "vertical-list", "list": items}
    ]}})
}

#[tokio::test]
async fn test_full_crawl_two_stores() {
    let harness = Harness::start().await;
    harness.mount_catalog().await;

    let mut coordinator = harness.coordinator();
    let run_id = coordinator.run_id();
    let summary = coordinator.run().await.expect("Run failed");

    assert_eq!(summary.stores_completed, 2);
    assert_eq!(summary.stores_abandoned, 0);
    assert_eq!(summary.products_emitted, 4);
    assert_eq!(harness.dataset_ids(), vec!["1", "2", "3", "4"]);
    assert_eq!(harness.acquisitions.load(Ordering::SeqCst), 1);

    let checkpoint = JsonCheckpoint::new(harness.file("checkpoint.json")).load();
    assert_eq!(checkpoint, CrawlCursor::new(2, 0, None));

    let content = fs::read_to_string(harness.file("products.csv")).unwrap();
    let header = content.lines().next().unwrap();
    assert!(header.starts_with("id,name,"));
    assert!(header.contains("cat_name_org"));
    assert!(header.contains("sub_cat_name_org"));
    assert!(header.ends_with("captured_at"));
    assert!(!content.contains("ad-1"));

    drop(coordinator);
    let ledger = harness.ledger();
    let run = ledger.get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.config_hash, "test-hash");
    let stores = ledger.get_store_results(run_id).unwrap();
    assert_eq!(stores.len(), 2);
    assert_eq!(stores[0].store_name, "Lidl");
    assert_eq!(stores[0].emitted, 3);
    assert_eq!(stores[1].emitted, 1);
    assert_eq!(ledger.count_emitted(run_id).unwrap(), 4);
}

#[tokio::test]
async fn test_restart_appends_nothing() {
    let harness = Harness::start().await;
    harness.mount_catalog().await;

    harness.coordinator().run().await.expect("First run failed");
    let before = fs::read_to_string(harness.file("products.csv")).unwrap();

    // The checkpoint is already past the last store
    let summary = harness.coordinator().run().await.expect("Second run failed");
    assert_eq!(summary.products_emitted, 0);
    assert_eq!(summary.stores_completed, 0);

    let after = fs::read_to_string(harness.file("products.csv")).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_fresh_rerun_emits_no_duplicates() {
    let harness = Harness::start().await;
    harness.mount_catalog().await;

    harness.coordinator().run().await.expect("First run failed");

    let mut coordinator = harness.coordinator_with(harness.config(), false, true);
    let summary = coordinator.run().await.expect("Fresh run failed");

    assert_eq!(summary.stores_completed, 2);
    assert_eq!(summary.products_emitted, 0);
    assert_eq!(harness.dataset_ids(), vec!["1", "2", "3", "4"]);
    assert_eq!(harness.requests_to("/stores/1/fruit").await, 2);
}

#[tokio::test]
async fn test_resume_mid_category_after_crash() {
    let harness = Harness::start().await;
    harness.mount_json("/stores/1/categories/tree", tree(1, &["fruit", "dairy"])).await;
    harness.mount_json("/stores/2/categories/tree", tree(2, &["bakery"])).await;
    harness
        .mount_json(
            "/stores/1/dairy",
            page(json!([{"id": "A"}, {"id": "B"}, {"id": "C"}, {"id": "D"}])),
        )
        .await;
    harness.mount_json("/stores/2/bakery", page(json!([]))).await;

    // State left behind by an interrupted run
    fs::write(harness.file("products.csv"), "id,name\nA,a\nB,b\n").unwrap();
    JsonCheckpoint::new(harness.file("checkpoint.json"))
        .save(&CrawlCursor::new(0, 1, Some("B".to_string())))
        .unwrap();

    let summary = harness.coordinator().run().await.expect("Resumed run failed");

    assert_eq!(summary.products_emitted, 2);
    assert_eq!(harness.dataset_ids(), vec!["A", "B", "C", "D"]);
    assert_eq!(harness.requests_to("/stores/1/fruit").await, 0);
}

#[tokio::test]
async fn test_single_401_refreshes_once_and_replays() {
    let harness = Harness::start().await;
    harness.mount_json("/stores/1/categories/tree", tree(1, &["fruit"])).await;
    harness.mount_json("/stores/2/categories/tree", tree(2, &[])).await;
    Mock::given(method("GET"))
        .and(path("/stores/1/fruit"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&harness.server)
        .await;
    harness.mount_json("/stores/1/fruit", page(json!([{"id": 7}]))).await;

    let mut coordinator = harness.coordinator();
    let summary = coordinator.run().await.expect("Run failed");

    assert_eq!(summary.products_emitted, 1);
    assert_eq!(summary.categories_failed, 0);
    assert_eq!(harness.requests_to("/stores/1/fruit").await, 2);
    assert_eq!(coordinator.walker().client().session().refresh_count(), 1);
    // The keep-alive revived the session, no new account was needed
    assert_eq!(harness.acquisitions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_persistent_401_fails_only_the_category() {
    let harness = Harness::start().await;
    harness.mount_json("/stores/1/categories/tree", tree(1, &["fruit", "dairy"])).await;
    harness.mount_json("/stores/2/categories/tree", tree(2, &[])).await;
    harness.mount_status("/stores/1/fruit", 401).await;
    harness.mount_json("/stores/1/dairy", page(json!([{"id": 9}]))).await;

    let mut coordinator = harness.coordinator();
    let run_id = coordinator.run_id();
    let summary = coordinator.run().await.expect("Run failed");

    assert_eq!(summary.stores_completed, 2);
    assert_eq!(summary.categories_failed, 1);
    assert_eq!(summary.products_emitted, 1);
    // The request and its single replay, then the category is given up
    assert_eq!(harness.requests_to("/stores/1/fruit").await, 2);
    assert_eq!(coordinator.walker().client().session().refresh_count(), 1);

    drop(coordinator);
    let stores = harness.ledger().get_store_results(run_id).unwrap();
    assert_eq!(stores[0].failed_categories, vec!["fruit"]);
    assert_eq!(stores[0].outcome, StoreOutcome::Completed);
}

#[tokio::test]
async fn test_rate_limited_category_backs_off_five_ten_twenty() {
    let harness = Harness::start().await;
    harness.mount_json("/stores/1/categories/tree", tree(1, &["fruit"])).await;
    harness.mount_json("/stores/2/categories/tree", tree(2, &[])).await;
    harness.mount_status("/stores/1/fruit", 429).await;

    let mut coordinator = harness.coordinator();
    let summary = coordinator.run().await.expect("Run failed");

    assert_eq!(summary.categories_failed, 1);
    assert_eq!(coordinator.walker().client().session().refresh_count(), 1);
    // One backoff sequence, a session refresh, then one more sequence
    assert_eq!(harness.requests_to("/stores/1/fruit").await, 6);
    let backoff = [
        Duration::from_secs(5),
        Duration::from_secs(10),
        Duration::from_secs(20),
    ];
    assert_eq!(harness.pause.delays(), [backoff, backoff].concat());
    let checkpoint = JsonCheckpoint::new(harness.file("checkpoint.json")).load();
    assert_eq!(checkpoint, CrawlCursor::new(2, 0, None));
}

#[tokio::test]
async fn test_rate_limit_rounds_refresh_between_attempts() {
    let harness = Harness::start().await;
    harness.mount_json("/stores/1/categories/tree", tree(1, &["fruit"])).await;
    harness.mount_json("/stores/2/categories/tree", tree(2, &[])).await;
    Mock::given(method("GET"))
        .and(path("/stores/1/fruit"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(3)
        .mount(&harness.server)
        .await;
    harness.mount_json("/stores/1/fruit", page(json!([{"id": 5}]))).await;

    let mut coordinator = harness.coordinator();
    let summary = coordinator.run().await.expect("Run failed");

    assert_eq!(summary.products_emitted, 1);
    assert_eq!(summary.categories_failed, 0);
    assert_eq!(coordinator.walker().client().session().refresh_count(), 1);
}

#[tokio::test]
async fn test_unreachable_store_is_abandoned_and_skipped() {
    let harness = Harness::start().await;
    harness.mount_status("/stores/1/categories/tree", 503).await;
    harness.mount_json("/stores/2/categories/tree", tree(2, &["bakery"])).await;
    harness.mount_json("/stores/2/bakery", page(json!([{"id": 4}]))).await;

    let mut coordinator = harness.coordinator();
    let run_id = coordinator.run_id();
    let summary = coordinator.run().await.expect("Run failed");

    assert_eq!(summary.stores_abandoned, 1);
    assert_eq!(summary.stores_completed, 1);
    assert_eq!(summary.products_emitted, 1);
    assert_eq!(harness.requests_to("/stores/1/categories/tree").await, 2);

    drop(coordinator);
    let stores = harness.ledger().get_store_results(run_id).unwrap();
    assert_eq!(stores[0].outcome, StoreOutcome::Abandoned);
    assert!(stores[0].error_message.is_some());
    assert_eq!(stores[1].outcome, StoreOutcome::Completed);
}

#[tokio::test]
async fn test_authentication_failure_stops_the_run() {
    let harness = Harness::start().await;
    harness.mount_catalog().await;

    let mut coordinator = harness.coordinator_with(harness.config(), true, false);
    let run_id = coordinator.run_id();
    let err = coordinator.run().await.unwrap_err();

    assert!(matches!(err, SweepError::Authentication(_)));
    assert_eq!(harness.requests_to("/stores/1/categories/tree").await, 0);
    assert!(!harness.file("products.csv").exists());
    assert!(!harness.file("checkpoint.json").exists());

    drop(coordinator);
    let run = harness.ledger().get_run(run_id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.finished_at.is_some());
}
