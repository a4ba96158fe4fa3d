//! Error taxonomy shared by the server-side validators, issuers and verifiers.
//!
//! Three classes, kept apart so callers can react correctly:
//! - [`ConfigError`]: operator-caused, fatal, fail closed, never retried
//! - [`AuthError`]: caller-correctable rejection, surfaced as-is, never retried
//! - [`TransientError`]: storage / network hiccup while fetching key material
//!   or registry state; the only retryable class

use std::time::Duration;

/// Server-side misconfiguration. Never attributable to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no token signing key configured (set a private JWK or an HMAC secret)")]
    MissingSigningKey,
    #[error("asymmetric signing key requires a key id (kid)")]
    MissingKeyId,
    #[error("app token secret is not configured")]
    MissingAppSecret,
    #[error("malformed signing key: {0}")]
    MalformedKey(String),
    #[error("unsupported signing key: {0}")]
    UnsupportedKey(String),
    #[error("token signing failed")]
    Signing,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Authentication rejection. The variant tells the caller which check failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Device not found")]
    DeviceNotFound,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Timestamp expired")]
    TimestampExpired,
    #[error("Replay detected")]
    ReplayDetected,
    #[error("Missing authentication headers")]
    MissingCredentials,
    #[error("Malformed timestamp")]
    MalformedTimestamp,
    #[error("Invalid token format")]
    InvalidTokenFormat,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Invalid token type")]
    InvalidTokenType,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token signature")]
    InvalidTokenSignature,
    #[error("Device approval required")]
    ApprovalRequired,
    #[error("Device disabled")]
    DeviceDisabled,
    #[error("Device blacklisted")]
    DeviceBlacklisted,
    #[error("Device deleted")]
    DeviceDeleted,
    #[error("Device has no pairing code")]
    NotPaired,
}

impl AuthError {
    /// Stable machine-readable code used in wire responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DeviceNotFound => "device_not_found",
            Self::InvalidSignature => "invalid_signature",
            Self::TimestampExpired => "timestamp_expired",
            Self::ReplayDetected => "replay_detected",
            Self::MissingCredentials => "missing_credentials",
            Self::MalformedTimestamp => "malformed_timestamp",
            Self::InvalidTokenFormat => "invalid_token_format",
            Self::InvalidToken => "invalid_token",
            Self::InvalidTokenType => "invalid_token_type",
            Self::TokenExpired => "token_expired",
            Self::InvalidTokenSignature => "invalid_token_signature",
            Self::ApprovalRequired => "approval_required",
            Self::DeviceDisabled => "device_disabled",
            Self::DeviceBlacklisted => "device_blacklisted",
            Self::DeviceDeleted => "device_deleted",
            Self::NotPaired => "not_paired",
        }
    }

    /// Rejections caused by the device's administrative state rather than
    /// by the credentials it presented.
    pub fn is_device_state(&self) -> bool {
        matches!(
            self,
            Self::ApprovalRequired
                | Self::DeviceDisabled
                | Self::DeviceBlacklisted
                | Self::DeviceDeleted
        )
    }
}

/// Retryable I/O failure.
#[derive(Debug, thiserror::Error)]
pub enum TransientError {
    #[error("device registry unavailable: {0}")]
    Registry(String),
    #[error("key material fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("key material fetch failed: {0}")]
    Network(String),
}

/// Top-level error for server-side operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Transient(#[from] TransientError),
}

impl Error {
    /// Only transient failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_is_retryable() {
        assert!(Error::from(TransientError::Registry("locked".into())).is_retryable());
        assert!(!Error::from(AuthError::InvalidSignature).is_retryable());
        assert!(!Error::from(ConfigError::MissingSigningKey).is_retryable());
    }

    #[test]
    fn auth_codes_are_stable() {
        assert_eq!(AuthError::ReplayDetected.code(), "replay_detected");
        assert_eq!(AuthError::ApprovalRequired.code(), "approval_required");
        assert_eq!(AuthError::InvalidSignature.to_string(), "Invalid signature");
    }

    #[test]
    fn device_state_errors_are_classified() {
        assert!(AuthError::DeviceBlacklisted.is_device_state());
        assert!(!AuthError::TokenExpired.is_device_state());
    }
}
