//! Token acquisition
//!
//! The harvester never creates accounts itself. A fresh bearer token comes from an
//! [`Authenticator`]: either a fixed token, or an external program (typically the
//! browser automation that registers a disposable account) that prints one.

use crate::config::AuthConfig;
use crate::session::AuthError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// Produces a brand-new bearer token
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn acquire_token(&self) -> Result<String, AuthError>;
}

/// Returns a token fixed at startup
#[derive(Debug, Clone)]
pub struct StaticAuthenticator {
    token: String,
}

impl StaticAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Reads the token from an environment variable
    pub fn from_env(var: &str) -> Result<Self, AuthError> {
        let token = std::env::var(var).map_err(|_| AuthError::MissingEnv(var.to_string()))?;
        Ok(Self::new(token))
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn acquire_token(&self) -> Result<String, AuthError> {
        normalize_token(&self.token)
    }
}

/// Runs an external program and takes its trimmed stdout as the token
#[derive(Debug, Clone)]
pub struct CommandAuthenticator {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAuthenticator {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

#[async_trait]
impl Authenticator for CommandAuthenticator {
    async fn acquire_token(&self) -> Result<String, AuthError> {
        tracing::info!("Running token command: {}", self.program);

        let run = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| AuthError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AuthError::Command(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        // Helpers often log before printing the token; the token is the last line
        let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
        normalize_token(last_line)
    }
}

/// Builds the authenticator described by the `[auth]` section
pub fn from_config(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    if let Some(command) = &config.command {
        return Ok(Box::new(CommandAuthenticator::new(
            command.clone(),
            config.args.clone(),
            Duration::from_secs(config.command_timeout_secs),
        )));
    }
    if let Some(var) = &config.token_env {
        return Ok(Box::new(StaticAuthenticator::from_env(var)?));
    }
    match &config.token {
        Some(token) => Ok(Box::new(StaticAuthenticator::new(token.clone()))),
        None => Err(AuthError::NotConfigured),
    }
}

/// Strips whitespace and quotes; rejects empty and `null` tokens
pub fn normalize_token(raw: &str) -> Result<String, AuthError> {
    let token = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if token.is_empty() || token.eq_ignore_ascii_case("null") {
        return Err(AuthError::EmptyToken);
    }
    Ok(token.to_string())
}
