//! Request header construction
//!
//! Headers are built fresh for every attempt from the current session, so a
//! replayed request always carries the latest token, session id and timestamps.

use crate::config::ApiConfig;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, ORIGIN, REFERER};
use uuid::Uuid;

/// Builds per-request headers for the catalog API
#[derive(Debug, Clone)]
pub struct HeaderFactory {
    origin: String,
    client_version: String,
    country: String,
    whitelabel: String,
    /// Stable for the whole run
    device_id: String,
}

impl HeaderFactory {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            origin: api.origin.trim_end_matches('/').to_string(),
            client_version: api.client_version.clone(),
            country: api.country.clone(),
            whitelabel: api.whitelabel.clone(),
            device_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Headers for one attempt
    ///
    /// `token` is omitted when there is no session yet.
    pub fn build(&self, token: Option<&str>, session_id: &str) -> HeaderMap {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

        let fields = [
            (ORIGIN, self.origin.clone()),
            (REFERER, format!("{}/", self.origin)),
            (HeaderName::from_static("x-s24-client"), self.client_version.clone()),
            (HeaderName::from_static("x-s24-country"), self.country.clone()),
            (HeaderName::from_static("x-s24-whitelabel"), self.whitelabel.clone()),
            (HeaderName::from_static("user-session"), session_id.to_string()),
            (HeaderName::from_static("x-device-id"), self.device_id.clone()),
            (HeaderName::from_static("x-timestamp"), now.timestamp().to_string()),
            (HeaderName::from_static("x-request-time"), now.to_rfc3339()),
        ];
        for (name, value) in fields {
            insert_checked(&mut headers, name, &value);
        }

        if let Some(token) = token {
            insert_checked(&mut headers, AUTHORIZATION, &bearer(token));
        }

        headers
    }
}

fn bearer(token: &str) -> String {
    if token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bearer {}", token)
    }
}

fn insert_checked(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!("Dropping header {} with invalid characters", name),
    }
}
