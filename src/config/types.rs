use serde::Deserialize;
use std::fmt;

/// Main configuration structure for Aisle-Sweep
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub api: ApiConfig,
    pub auth: AuthConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "store")]
    pub stores: Vec<StoreEntry>,
}

/// Retry, backoff and pacing behaviour
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Attempts made against HTTP 429 before a call is declared rate limited
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Whether backoff delays receive random jitter
    #[serde(default = "default_true")]
    pub jitter: bool,

    /// Attempts made against timeouts, connection errors and 5xx responses
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,

    /// Linear delay step between transient retries (milliseconds)
    #[serde(default = "default_transient_delay_ms")]
    pub transient_delay_ms: u64,

    /// Session refreshes allowed per category while it keeps getting rate limited
    #[serde(default = "default_max_rate_limit_rounds")]
    pub max_rate_limit_rounds: u32,

    /// Attempts per store before it is abandoned
    #[serde(default = "default_max_store_attempts")]
    pub max_store_attempts: u32,

    /// Pause before each category fetch (milliseconds)
    #[serde(default = "default_category_pause_ms")]
    pub category_pause_ms: u64,

    /// `take` parameter sent with product batch requests
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// How long a validated session is trusted without another check (seconds)
    #[serde(default = "default_validation_interval_secs")]
    pub validation_interval_secs: u64,

    /// Per-request timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            jitter: true,
            transient_retries: default_transient_retries(),
            transient_delay_ms: default_transient_delay_ms(),
            max_rate_limit_rounds: default_max_rate_limit_rounds(),
            max_store_attempts: default_max_store_attempts(),
            category_pause_ms: default_category_pause_ms(),
            batch_size: default_batch_size(),
            validation_interval_secs: default_validation_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Catalog API endpoint and client identification
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ApiConfig {
    /// Base URL every catalog path is resolved against
    pub base_url: String,

    /// Cheap authenticated endpoint used for validation and keep-alive
    pub keep_alive_path: String,

    /// Origin/referer presented by the client
    pub origin: String,

    #[serde(default = "default_client_version")]
    pub client_version: String,

    #[serde(default = "default_country")]
    pub country: String,

    /// White-label host the client claims to be
    pub whitelabel: String,

    /// `widget_type` values whose `list` holds product items
    #[serde(default = "default_product_widgets")]
    pub product_widgets: Vec<String>,
}

/// Where bearer tokens come from
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfig {
    /// Fixed token
    pub token: Option<String>,

    /// Name of an environment variable holding the token
    pub token_env: Option<String>,

    /// External program printing a fresh token on stdout
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Path to the append-only CSV dataset
    pub dataset_path: String,

    /// Path to the JSON checkpoint
    pub checkpoint_path: String,

    /// Path to the SQLite run ledger
    pub ledger_path: String,

    /// Identifier stamped on every row
    #[serde(default)]
    pub source_file_id: Option<ScalarId>,

    /// Offset applied to emission timestamps (hours east of UTC)
    #[serde(default)]
    pub utc_offset_hours: i32,
}

/// One store to harvest
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StoreEntry {
    pub name: String,
    pub id: ScalarId,

    /// Deep link of the store, e.g. `everli://app/stores/12`
    pub link: String,

    #[serde(default)]
    pub area_id: Option<ScalarId>,
    #[serde(default)]
    pub url_id: Option<ScalarId>,
    #[serde(default)]
    pub currency_id: Option<ScalarId>,
    #[serde(default)]
    pub country_id: Option<ScalarId>,
    #[serde(default)]
    pub src_id: Option<ScalarId>,
}

/// An identifier that may be written as a number or a string
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ScalarId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ScalarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_transient_retries() -> u32 {
    3
}

fn default_transient_delay_ms() -> u64 {
    2_000
}

fn default_max_rate_limit_rounds() -> u32 {
    5
}

fn default_max_store_attempts() -> u32 {
    2
}

fn default_category_pause_ms() -> u64 {
    1_500
}

fn default_batch_size() -> u64 {
    100_000_000
}

fn default_validation_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_client_version() -> String {
    "website/8.4.1".to_string()
}

fn default_country() -> String {
    "ITA".to_string()
}

fn default_product_widgets() -> Vec<String> {
    vec!["vertical-list".to_string()]
}

fn default_command_timeout_secs() -> u64 {
    600
}
