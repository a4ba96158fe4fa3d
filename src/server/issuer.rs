//! Token issuance for authenticated devices and their paired apps.

use super::keys::SigningKey;
use super::registry::DeviceRecord;
use super::token::{encode, AppClaims, DeviceClaims, IdentityKey};
use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, ConfigError, Result};
use crate::protocol::{APP_TOKEN_TYPE, DEVICE_TOKEN_TYPE};
use chrono::{DateTime, SecondsFormat};
use std::sync::Arc;

pub const DEFAULT_DEVICE_TOKEN_TTL_SECS: u64 = 86_400;
pub const DEFAULT_APP_TOKEN_TTL_SECS: u64 = 3_600;
/// Upper bound on any configured token lifetime (one year).
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 86_400;

/// Lifetimes and subject selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPolicy {
    pub device_ttl_secs: u64,
    pub app_ttl_secs: u64,
    pub identity_key: IdentityKey,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            device_ttl_secs: DEFAULT_DEVICE_TOKEN_TTL_SECS,
            app_ttl_secs: DEFAULT_APP_TOKEN_TTL_SECS,
            identity_key: IdentityKey::DeviceUuid,
        }
    }
}

/// A freshly signed token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: u64,
    pub expires_at: u64,
}

impl IssuedToken {
    /// `expires_at` as RFC 3339 UTC with a `Z` suffix.
    pub fn expires_at_rfc3339(&self) -> String {
        i64::try_from(self.expires_at)
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }
}

pub struct TokenIssuer {
    device_key: Arc<SigningKey>,
    app_key: Option<Arc<SigningKey>>,
    policy: TokenPolicy,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(device_key: Arc<SigningKey>, policy: TokenPolicy) -> Self {
        Self {
            device_key,
            app_key: None,
            policy,
            clock: Arc::new(SystemClock),
        }
    }

    /// App tokens are signed with their own HMAC secret.
    pub fn with_app_secret(mut self, secret: &str) -> Self {
        self.app_key = Some(Arc::new(SigningKey::hmac(secret.as_bytes(), None)));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn issue_device_token(&self, device: &DeviceRecord) -> Result<IssuedToken> {
        let (sub, device_uuid, pairing_code) = match self.policy.identity_key {
            IdentityKey::DeviceUuid => (
                device.device_uuid.clone(),
                Some(device.device_uuid.clone()),
                None,
            ),
            IdentityKey::PairingCode => {
                let code = device.pairing_code.clone().ok_or(AuthError::NotPaired)?;
                (code.clone(), None, Some(code))
            }
        };

        let iat = self.clock.now_secs();
        let exp = expiry(iat, self.policy.device_ttl_secs)?;
        let claims = DeviceClaims {
            sub,
            serial_number: device.serial_number.clone(),
            device_id: device.device_id.clone(),
            device_uuid,
            pairing_code,
            token_type: DEVICE_TOKEN_TYPE.to_string(),
            iat,
            exp,
        };

        let token = encode(&self.device_key, &claims)?;
        tracing::info!(
            serial = %device.serial_number,
            alg = %self.device_key.algorithm(),
            exp = claims.exp,
            "Device token issued"
        );
        Ok(IssuedToken {
            token,
            issued_at: iat,
            expires_at: claims.exp,
        })
    }

    pub fn issue_app_token(&self, device: &DeviceRecord) -> Result<IssuedToken> {
        let app_key = self.app_key.as_ref().ok_or(ConfigError::MissingAppSecret)?;
        let pairing_code = device.pairing_code.clone().ok_or(AuthError::NotPaired)?;

        let iat = self.clock.now_secs();
        let exp = expiry(iat, self.policy.app_ttl_secs)?;
        let claims = AppClaims {
            sub: pairing_code.clone(),
            serial_number: device.serial_number.clone(),
            device_id: device.device_id.clone(),
            pairing_code,
            token_type: APP_TOKEN_TYPE.to_string(),
            iat,
            exp,
        };

        let token = encode(app_key, &claims)?;
        tracing::info!(serial = %device.serial_number, exp = claims.exp, "App token issued");
        Ok(IssuedToken {
            token,
            issued_at: iat,
            expires_at: claims.exp,
        })
    }
}

fn expiry(iat: u64, ttl_secs: u64) -> std::result::Result<u64, ConfigError> {
    iat.checked_add(ttl_secs)
        .ok_or_else(|| ConfigError::Invalid(format!("token lifetime {ttl_secs}s overflows")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::Error;
    use crate::server::token::decode;

    const T: u64 = 1_706_400_000;

    fn device() -> DeviceRecord {
        DeviceRecord::new(
            "A1B2C3D4",
            "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2",
        )
    }

    fn issuer(policy: TokenPolicy) -> TokenIssuer {
        TokenIssuer::new(Arc::new(SigningKey::hmac(b"device-secret", None)), policy)
            .with_app_secret("app-secret")
            .with_clock(Arc::new(ManualClock::new(T)))
    }

    #[test]
    fn device_token_carries_uuid_by_default() {
        let record = device();
        let issued = issuer(TokenPolicy::default())
            .issue_device_token(&record)
            .unwrap();
        assert_eq!(issued.issued_at, T);
        assert_eq!(issued.expires_at, T + 86_400);

        let claims = decode::<DeviceClaims>(&issued.token).unwrap().claims;
        assert_eq!(claims.sub, record.device_uuid);
        assert_eq!(claims.device_uuid.as_deref(), Some(record.device_uuid.as_str()));
        assert_eq!(claims.pairing_code, None);
        assert_eq!(claims.token_type, "device");
        assert_eq!(claims.serial_number, "A1B2C3D4");
        assert_eq!(claims.device_id, "webex-display-C3D4");
    }

    #[test]
    fn pairing_code_identity_requires_a_code() {
        let policy = TokenPolicy {
            identity_key: IdentityKey::PairingCode,
            ..TokenPolicy::default()
        };
        let issuer = issuer(policy);
        assert!(matches!(
            issuer.issue_device_token(&device()),
            Err(Error::Auth(AuthError::NotPaired))
        ));

        let issued = issuer
            .issue_device_token(&device().with_pairing_code("ABC123"))
            .unwrap();
        let claims = decode::<DeviceClaims>(&issued.token).unwrap().claims;
        assert_eq!(claims.sub, "ABC123");
        assert_eq!(claims.device_uuid, None);
    }

    #[test]
    fn app_token_uses_configured_ttl() {
        let policy = TokenPolicy {
            app_ttl_secs: 900,
            ..TokenPolicy::default()
        };
        let issued = issuer(policy)
            .issue_app_token(&device().with_pairing_code("ABC123"))
            .unwrap();
        assert_eq!(issued.expires_at, T + 900);

        let claims = decode::<AppClaims>(&issued.token).unwrap().claims;
        assert_eq!(claims.token_type, "app_auth");
        assert_eq!(claims.pairing_code, "ABC123");
    }

    #[test]
    fn app_token_without_secret_is_config_error() {
        let issuer = TokenIssuer::new(
            Arc::new(SigningKey::hmac(b"device-secret", None)),
            TokenPolicy::default(),
        );
        assert!(matches!(
            issuer.issue_app_token(&device().with_pairing_code("ABC123")),
            Err(Error::Config(ConfigError::MissingAppSecret))
        ));
    }

    #[test]
    fn overflowing_ttl_is_config_error() {
        let policy = TokenPolicy {
            device_ttl_secs: u64::MAX,
            app_ttl_secs: u64::MAX,
            ..TokenPolicy::default()
        };
        let issuer = issuer(policy);
        assert!(matches!(
            issuer.issue_device_token(&device()),
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
        assert!(matches!(
            issuer.issue_app_token(&device().with_pairing_code("ABC123")),
            Err(Error::Config(ConfigError::Invalid(_)))
        ));
    }

    #[test]
    fn expiry_renders_as_rfc3339() {
        let issued = IssuedToken {
            token: String::new(),
            issued_at: 1_770_206_400,
            expires_at: 1_770_292_800,
        };
        assert_eq!(issued.expires_at_rfc3339(), "2026-02-05T12:00:00Z");
    }
}
