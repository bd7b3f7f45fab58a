use crate::client::{
    ApiEndpoint, Attempt, GiveUp, Pause, RequestError, RequestSpec, RetryDriver, RetryPolicies,
};
use crate::config::{ApiConfig, CrawlerConfig, MAX_VALIDATION_INTERVAL_SECS};
use crate::session::authenticator::{normalize_token, Authenticator};
use crate::session::headers::HeaderFactory;
use crate::session::{Session, SessionError, SessionStatus};
use chrono::Utc;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::sync::Arc;
use url::Url;

/// Owns the run's [`Session`] and keeps it usable
///
/// Validation and keep-alive go through the same retry driver as catalog calls;
/// when the keep-alive endpoint cannot be satisfied a brand-new token is
/// requested from the [`Authenticator`].
pub struct SessionManager {
    session: Session,
    authenticator: Box<dyn Authenticator>,
    endpoint: ApiEndpoint,
    keep_alive_url: Url,
    headers: HeaderFactory,
    policies: RetryPolicies,
    pause: Arc<dyn Pause>,
    validation_interval: chrono::Duration,
    refreshes: u32,
    acquisitions: u32,
}

impl SessionManager {
    /// Creates a manager with no session yet
    ///
    /// # Arguments
    ///
    /// * `authenticator` - Source of fresh tokens
    /// * `endpoint` - The catalog API the keep-alive path is resolved against
    /// * `api` - Keep-alive path and client identification
    /// * `crawler` - Retry budgets and the validation interval
    /// * `pause` - Waits between keep-alive attempts
    pub fn new(
        authenticator: Box<dyn Authenticator>,
        endpoint: ApiEndpoint,
        api: &ApiConfig,
        crawler: &CrawlerConfig,
        pause: Arc<dyn Pause>,
    ) -> Result<Self, RequestError> {
        let keep_alive = RequestSpec::new(api.keep_alive_path.clone())
            .with_query("skip", 0)
            .with_query("take", 10);
        let keep_alive_url = endpoint.resolve(&keep_alive)?;

        Ok(Self {
            session: Session::unauthenticated(),
            authenticator,
            endpoint,
            keep_alive_url,
            headers: HeaderFactory::new(api),
            policies: RetryPolicies::from_config(crawler),
            pause,
            validation_interval: validation_interval(crawler.validation_interval_secs),
            refreshes: 0,
            acquisitions: 0,
        })
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn token(&self) -> Option<&str> {
        self.session.token()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Number of `refresh()` calls so far
    pub fn refresh_count(&self) -> u32 {
        self.refreshes
    }

    /// Number of token acquisition attempts so far
    pub fn acquisition_count(&self) -> u32 {
        self.acquisitions
    }

    /// Headers for the next attempt, carrying the current token
    pub fn request_headers(&self) -> HeaderMap {
        self.headers
            .build(self.session.token(), self.session.session_id())
    }

    /// Returns a token believed to be usable
    ///
    /// Without a session (or after a failure) a new one is acquired. A session
    /// validated within the configured interval is trusted as is; otherwise one
    /// keep-alive call decides between keeping it and refreshing it.
    pub async fn ensure_valid(&mut self) -> Result<String, SessionError> {
        if matches!(
            self.session.status(),
            SessionStatus::Unauthenticated | SessionStatus::Failed
        ) {
            return self.acquire().await;
        }

        if self.session.is_fresh(self.validation_interval, Utc::now()) {
            if let Some(token) = self.session.token() {
                return Ok(token.to_string());
            }
        }

        match self.keep_alive_once().await {
            Attempt::Done(()) => {
                self.session.mark_validated();
                tracing::debug!("Session validated");
                self.current_token()
            }
            _ => {
                tracing::info!("Session validation failed, refreshing");
                self.refresh().await
            }
        }
    }

    /// Revives the session, re-acquiring it when keep-alive cannot
    ///
    /// 429 and transport failures on the keep-alive endpoint are retried with
    /// backoff; 401 or any other status goes straight to re-acquisition.
    pub async fn refresh(&mut self) -> Result<String, SessionError> {
        self.refreshes += 1;

        if self.session.token().is_none() {
            return self.acquire().await;
        }

        self.session.set_status(SessionStatus::Refreshing);
        tracing::info!("Refreshing session (refresh #{})", self.refreshes);

        let outcome = {
            let driver = RetryDriver::new(
                &self.policies.rate_limit,
                &self.policies.transient,
                self.pause.as_ref(),
            );
            driver.drive("keep-alive", || self.keep_alive_once()).await
        };

        match outcome {
            Ok(()) => {
                self.session.mark_validated();
                tracing::info!("Session kept alive");
                self.current_token()
            }
            Err(GiveUp::Failed(status)) => {
                tracing::warn!("Keep-alive answered HTTP {}, acquiring a new session", status);
                self.acquire().await
            }
            Err(GiveUp::RateLimited { attempts }) => {
                tracing::warn!(
                    "Keep-alive still rate limited after {} attempts, acquiring a new session",
                    attempts
                );
                self.acquire().await
            }
            Err(GiveUp::Transient {
                attempts,
                last_error,
            }) => {
                tracing::warn!(
                    "Keep-alive unreachable after {} attempts ({}), acquiring a new session",
                    attempts,
                    last_error
                );
                self.acquire().await
            }
        }
    }

    fn current_token(&self) -> Result<String, SessionError> {
        self.session
            .token()
            .map(str::to_string)
            .ok_or(SessionError::Acquisition(
                crate::session::AuthError::EmptyToken,
            ))
    }

    async fn keep_alive_once(&self) -> Attempt<(), u16> {
        let headers = self.request_headers();
        match self.endpoint.get(self.keep_alive_url.clone(), headers).await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    Attempt::Done(())
                } else if status == StatusCode::TOO_MANY_REQUESTS {
                    Attempt::RateLimited
                } else if status.is_server_error() {
                    Attempt::Transient(format!("HTTP {}", status.as_u16()))
                } else {
                    Attempt::Fail(status.as_u16())
                }
            }
            Err(e) => Attempt::Transient(e.to_string()),
        }
    }

    /// Replaces the session with a freshly acquired one
    async fn acquire(&mut self) -> Result<String, SessionError> {
        self.acquisitions += 1;
        tracing::info!("Acquiring a new session (attempt #{})", self.acquisitions);

        let acquired = match self.authenticator.acquire_token().await {
            Ok(raw) => normalize_token(&raw),
            Err(e) => Err(e),
        };

        match acquired {
            Ok(token) => {
                self.session = Session::issued(token.clone());
                tracing::info!("New session {} is active", self.session.session_id());
                Ok(token)
            }
            Err(e) => {
                self.session.set_status(SessionStatus::Failed);
                tracing::error!("Session acquisition failed: {}", e);
                Err(SessionError::Acquisition(e))
            }
        }
    }
}

/// Trust window for a validated session, capped at one day
fn validation_interval(secs: u64) -> chrono::Duration {
    let capped = std::time::Duration::from_secs(secs.min(MAX_VALIDATION_INTERVAL_SECS));
    chrono::Duration::from_std(capped).unwrap_or_else(|_| chrono::Duration::zero())
}
