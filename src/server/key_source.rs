//! Optional remote fetch of the private signing JWK.
//!
//! This is the only blocking I/O on the token path and it runs once at
//! startup. Failures are [`TransientError`] so the caller can retry instead
//! of treating them as a bad key.

use crate::error::{ConfigError, TransientError};
use std::time::Duration;

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP endpoint serving a private JWK or a JWK set.
#[derive(Debug, Clone)]
pub struct RemoteKeySource {
    url: String,
    bearer: Option<String>,
    timeout: Duration,
}

impl RemoteKeySource {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            bearer: None,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the response body. Must not be called from inside an async runtime.
    pub fn fetch(&self) -> Result<String, TransientError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransientError::Network(e.to_string()))?;

        let mut request = client.get(&self.url);
        if let Some(token) = &self.bearer {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().map_err(|e| self.classify(&e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransientError::Network(format!(
                "key endpoint returned HTTP {status}"
            )));
        }
        let body = response.text().map_err(|e| self.classify(&e))?;
        tracing::info!(url = %self.url, "Fetched signing key material");
        Ok(body)
    }

    fn classify(&self, e: &reqwest::Error) -> TransientError {
        if e.is_timeout() {
            tracing::warn!(url = %self.url, timeout = ?self.timeout, "Key fetch timed out");
            TransientError::Timeout(self.timeout)
        } else {
            tracing::warn!(url = %self.url, error = %e, "Key fetch failed");
            TransientError::Network(e.to_string())
        }
    }
}

/// Pick the private key out of a JWK or a `{"keys": [...]}` set. The first
/// key carrying a private member `d` wins.
pub fn select_private_jwk(body: &str) -> Result<String, ConfigError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ConfigError::MalformedKey(format!("key endpoint returned invalid JSON: {e}")))?;

    let is_private = |v: &serde_json::Value| v.get("d").and_then(|d| d.as_str()).is_some();

    let key = match value.get("keys").and_then(|k| k.as_array()) {
        Some(keys) => keys.iter().find(|k| is_private(k)),
        None => Some(&value).filter(|v| is_private(v)),
    };

    key.map(|k| k.to_string())
        .ok_or_else(|| ConfigError::MalformedKey("no private key in key endpoint response".into()))
}
