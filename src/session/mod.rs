//! Session management
//!
//! Exactly one [`Session`] exists per run. The [`SessionManager`] owns it and is the
//! only code that changes it:
//!
//! ```text
//! Unauthenticated --acquire--> Active --401/429 exhausted--> Refreshing --> Active
//!                                                                       \-> Failed
//! ```

mod authenticator;
mod headers;
mod manager;

pub use authenticator::{
    from_config as authenticator_from_config, normalize_token, Authenticator,
    CommandAuthenticator, StaticAuthenticator,
};
pub use headers::HeaderFactory;
pub use manager::SessionManager;

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised while obtaining a token
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Token command failed: {0}")]
    Command(String),

    #[error("Token command timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Environment variable {0} is not set")]
    MissingEnv(String),

    #[error("Authenticator returned an empty or null token")]
    EmptyToken,

    #[error("No token source configured")]
    NotConfigured,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the [`SessionManager`]
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Could not acquire a new session: {0}")]
    Acquisition(#[from] AuthError),
}

/// Lifecycle of the run's session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Active,
    Refreshing,
    Failed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unauthenticated => "unauthenticated",
            Self::Active => "active",
            Self::Refreshing => "refreshing",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The single live credential of a run
#[derive(Debug, Clone)]
pub struct Session {
    token: Option<String>,
    status: SessionStatus,
    /// Sent as `user-session`; a new token gets a new id
    session_id: String,
    issued_at: Option<DateTime<Utc>>,
    last_validated_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn unauthenticated() -> Self {
        Self {
            token: None,
            status: SessionStatus::Unauthenticated,
            session_id: Uuid::new_v4().to_string(),
            issued_at: None,
            last_validated_at: None,
        }
    }

    /// A freshly acquired, active session
    pub fn issued(token: String) -> Self {
        let now = Utc::now();
        Self {
            token: Some(token),
            status: SessionStatus::Active,
            session_id: Uuid::new_v4().to_string(),
            issued_at: Some(now),
            last_validated_at: Some(now),
        }
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.issued_at
    }

    pub fn last_validated_at(&self) -> Option<DateTime<Utc>> {
        self.last_validated_at
    }

    /// Active and validated no longer than `interval` ago
    pub fn is_fresh(&self, interval: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active
            && self
                .last_validated_at
                .map(|at| now - at < interval)
                .unwrap_or(false)
    }

    fn mark_validated(&mut self) {
        self.status = SessionStatus::Active;
        self.last_validated_at = Some(Utc::now());
    }

    fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }
}
