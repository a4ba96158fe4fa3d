//! Device-side view of the token obtained from the device-auth exchange.
//!
//! Holds the bearer token and its expiry, decides when to re-authenticate,
//! and classifies failed exchanges so the display can show a useful state.

use crate::protocol::AuthResponse;
use chrono::DateTime;

/// Re-authenticate this long before the token actually expires (seconds).
pub const TOKEN_REFRESH_MARGIN_SECS: u64 = 600;

/// Assumed lifetime when the server omits or mangles `expires_at`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 86_400;

/// Why a device-auth exchange failed, as far as the device can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    InvalidSignature,
    ApprovalRequired,
    Disabled,
    Blacklisted,
    Deleted,
    Other,
}

impl AuthFailure {
    /// Classify a non-success response body.
    pub fn classify(body: &str) -> Self {
        if body.is_empty() {
            return Self::Other;
        }
        let lowered = body.to_ascii_lowercase();
        if lowered.contains("invalid signature") || lowered.contains("invalid_signature") {
            Self::InvalidSignature
        } else if lowered.contains("approval_required") {
            Self::ApprovalRequired
        } else if lowered.contains("device_disabled") {
            Self::Disabled
        } else if lowered.contains("device_blacklisted") {
            Self::Blacklisted
        } else if lowered.contains("device_deleted") {
            Self::Deleted
        } else {
            Self::Other
        }
    }
}

/// An authenticated session.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub token: String,
    pub expires_at: u64,
    pub device_id: Option<String>,
    pub device_uuid: Option<String>,
    pub user_uuid: Option<String>,
    pub pairing_code: Option<String>,
    pub target_firmware_version: Option<String>,
    pub debug_enabled: bool,
    pub anon_key: Option<String>,
}

impl DeviceSession {
    /// Parse a successful auth response body. `now` is used only when the
    /// server's expiry is missing or unparsable.
    pub fn from_response(body: &str, now: u64) -> Result<Self, AuthFailure> {
        let response: AuthResponse = serde_json::from_str(body).map_err(|e| {
            tracing::error!(error = %e, "Auth response JSON parse error");
            AuthFailure::Other
        })?;

        if !response.success {
            let error = response.error.as_deref().unwrap_or("Unknown error");
            tracing::error!(error, "Auth error");
            return Err(AuthFailure::classify(error));
        }

        let Some(token) = response.token.filter(|t| !t.is_empty()) else {
            tracing::error!("Auth response missing token");
            return Err(AuthFailure::Other);
        };

        let expires_at = match response.expires_at.as_deref() {
            Some(raw) if !raw.is_empty() => parse_expiry(raw).unwrap_or_else(|| {
                tracing::warn!(expires_at = raw, "Failed to parse expires_at");
                now + DEFAULT_TOKEN_LIFETIME_SECS
            }),
            _ => now + DEFAULT_TOKEN_LIFETIME_SECS,
        };

        if response.debug_enabled {
            tracing::info!("Remote debug logging enabled by server");
        }

        Ok(Self {
            token,
            expires_at,
            device_id: response.device_id,
            device_uuid: response.device_uuid,
            user_uuid: response.user_uuid,
            pairing_code: response.pairing_code,
            target_firmware_version: response.target_firmware_version,
            debug_enabled: response.debug_enabled,
            anon_key: response.anon_key,
        })
    }

    /// Whether the token is still usable, keeping the refresh margin.
    pub fn is_authenticated(&self, now: u64) -> bool {
        !self.token.is_empty() && now < self.expires_at.saturating_sub(TOKEN_REFRESH_MARGIN_SECS)
    }

    /// `Authorization` header value.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Parse an RFC 3339 timestamp (`Z` suffix is always UTC) to unix seconds.
fn parse_expiry(raw: &str) -> Option<u64> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .and_then(|dt| u64::try_from(dt.timestamp()).ok())
}
