//! Rate-limited access to the catalog API
//!
//! This module handles every outbound request the harvester makes:
//! - Building the shared HTTP client
//! - Resolving catalog paths against the configured base URL
//! - Exponential backoff on HTTP 429, linear retry on transport failures
//! - Session refresh and a single replay on HTTP 401
//! - Classifying failures for the walker

mod backoff;
mod retry;

pub use backoff::{BackoffPolicy, Growth};
pub use retry::{Attempt, GiveUp, Pause, RecordingPause, RetryDriver, TokioPause};

use crate::config::CrawlerConfig;
use crate::session::{SessionError, SessionManager};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors surfaced by [`RateLimitedClient`]
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Rate limited on {url} after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("Transient failure on {url} after {attempts} attempts: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Unauthorized (401) on {url} even after a session refresh")]
    Unauthorized { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Malformed response from {url}: {message}")]
    Malformed { url: String, message: String },

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Session could not be refreshed: {0}")]
    Session(#[from] SessionError),
}

impl RequestError {
    /// True when the call gave up because of HTTP 429
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// True when no session could be obtained; the current store cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}

/// Path (relative to the API base) plus extra query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestSpec {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl RequestSpec {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Retry budgets for both failure classes
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    pub rate_limit: BackoffPolicy,
    pub transient: BackoffPolicy,
}

impl RetryPolicies {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            rate_limit: BackoffPolicy::exponential(
                Duration::from_millis(config.base_delay_ms),
                config.max_retries,
            )
            .with_jitter(config.jitter),
            transient: BackoffPolicy::linear(
                Duration::from_millis(config.transient_delay_ms),
                config.transient_retries,
            )
            .with_jitter(config.jitter),
        }
    }
}

/// Builds the shared HTTP client
pub fn build_http_client(config: &CrawlerConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("aisle-sweep/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// HTTP client bound to the catalog API base URL
#[derive(Debug, Clone)]
pub struct ApiEndpoint {
    http: Client,
    base_url: Url,
}

impl ApiEndpoint {
    pub fn new(http: Client, base_url: &str) -> Result<Self, RequestError> {
        // `Url::join` only keeps the last path segment when the base ends in '/'
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| RequestError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        Ok(Self { http, base_url })
    }

    /// Resolves a request against the base URL
    pub fn resolve(&self, spec: &RequestSpec) -> Result<Url, RequestError> {
        let relative = spec.path.trim_start_matches('/');
        let mut url = self
            .base_url
            .join(relative)
            .map_err(|e| RequestError::InvalidUrl(format!("{}: {}", spec.path, e)))?;
        if !spec.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &spec.query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub async fn get(&self, url: Url, headers: HeaderMap) -> Result<Response, reqwest::Error> {
        self.http.get(url).headers(headers).send().await
    }
}

/// Maps one HTTP exchange onto a retry [`Attempt`]
async fn classify(
    url: &Url,
    result: Result<Response, reqwest::Error>,
) -> Attempt<Value, RequestError> {
    let response = match result {
        Ok(response) => response,
        Err(e) if e.is_builder() => {
            return Attempt::Fail(RequestError::InvalidUrl(e.to_string()));
        }
        Err(e) => return Attempt::Transient(describe_transport_error(&e)),
    };

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Attempt::RateLimited;
    }
    if status == StatusCode::UNAUTHORIZED {
        return Attempt::Fail(RequestError::Unauthorized {
            url: url.to_string(),
        });
    }
    if status.is_server_error() {
        return Attempt::Transient(format!("HTTP {}", status.as_u16()));
    }
    if !status.is_success() {
        return Attempt::Fail(RequestError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => return Attempt::Transient(describe_transport_error(&e)),
    };
    match serde_json::from_str(&body) {
        Ok(value) => Attempt::Done(value),
        Err(e) => Attempt::Fail(RequestError::Malformed {
            url: url.to_string(),
            message: e.to_string(),
        }),
    }
}

fn describe_transport_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        e.to_string()
    }
}

/// Issues catalog requests with backoff, retry and session refresh
///
/// Owns the [`SessionManager`]; everything that needs the session goes through
/// [`RateLimitedClient::session_mut`].
pub struct RateLimitedClient {
    endpoint: ApiEndpoint,
    session: SessionManager,
    policies: RetryPolicies,
    pause: Arc<dyn Pause>,
}

impl RateLimitedClient {
    pub fn new(
        endpoint: ApiEndpoint,
        session: SessionManager,
        policies: RetryPolicies,
        pause: Arc<dyn Pause>,
    ) -> Self {
        Self {
            endpoint,
            session,
            policies,
            pause,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut SessionManager {
        &mut self.session
    }

    /// Waits using the configured pause (tests record instead of sleeping)
    pub async fn pause_for(&self, delay: Duration) {
        self.pause.pause(delay).await;
    }

    /// GETs a JSON document
    ///
    /// A 401 triggers exactly one session refresh and one replay; a second 401
    /// comes back as [`RequestError::Unauthorized`].
    pub async fn get_json(&mut self, spec: &RequestSpec) -> Result<Value, RequestError> {
        let url = self.endpoint.resolve(spec)?;
        match self.execute(&url).await {
            Err(RequestError::Unauthorized { .. }) => {
                tracing::warn!("401 from {}, refreshing session and replaying once", url);
                self.session.refresh().await?;
                self.execute(&url).await
            }
            other => other,
        }
    }

    async fn execute(&self, url: &Url) -> Result<Value, RequestError> {
        let driver = RetryDriver::new(
            &self.policies.rate_limit,
            &self.policies.transient,
            self.pause.as_ref(),
        );
        driver
            .drive(url.path(), || self.attempt(url))
            .await
            .map_err(|give_up| match give_up {
                GiveUp::RateLimited { attempts } => RequestError::RateLimited {
                    url: url.to_string(),
                    attempts,
                },
                GiveUp::Transient {
                    attempts,
                    last_error,
                } => RequestError::Transient {
                    url: url.to_string(),
                    attempts,
                    message: last_error,
                },
                GiveUp::Failed(err) => err,
            })
    }

    async fn attempt(&self, url: &Url) -> Attempt<Value, RequestError> {
        // Headers are rebuilt per attempt so a refreshed token or new session id is used
        let headers = self.session.request_headers();
        let result = self.endpoint.get(url.clone(), headers).await;
        classify(url, result).await
    }
}
