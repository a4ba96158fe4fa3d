//! Companion-app token validation.
//!
//! App tokens live in their own HMAC signing domain. The validator runs in
//! [`AppAuthMode::Disabled`] either when configuration says so or, with no
//! explicit setting, when no app secret is present; it then lets every token
//! through as [`AppPrincipal::Unverified`]. An explicit `enforced` setting
//! without a secret is a startup error.

use super::keys::SigningKey;
use super::token::AppClaims;
use super::validator::AuthMode;
use super::verifier::TokenVerifier;
use crate::clock::{Clock, SystemClock};
use crate::error::{AuthError, ConfigError};
use crate::protocol::APP_TOKEN_TYPE;
use std::sync::Arc;

pub enum AppAuthMode {
    Enforced(TokenVerifier),
    Disabled,
}

/// Who is calling, as far as the app token tells us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppPrincipal {
    Verified(AppClaims),
    /// Validation is disabled; nothing about the caller is known.
    Unverified,
}

pub struct AppTokenValidator {
    mode: AppAuthMode,
}

impl AppTokenValidator {
    /// Build from the optional app secret. Absent or empty means disabled.
    pub fn new(secret: Option<&str>) -> Self {
        Self::with_clock(secret, Arc::new(SystemClock))
    }

    pub fn with_clock(secret: Option<&str>, clock: Arc<dyn Clock>) -> Self {
        let mode = match non_empty(secret) {
            Some(secret) => enforced(secret, clock),
            None => {
                tracing::warn!("APP_TOKEN_SECRET not configured; app token validation is DISABLED");
                AppAuthMode::Disabled
            }
        };
        Self { mode }
    }

    /// Build from an explicit posture. `None` falls back to deriving it from
    /// the secret; `Enforced` without a secret is rejected.
    pub fn configured(mode: Option<AuthMode>, secret: Option<&str>) -> Result<Self, ConfigError> {
        Self::configured_with_clock(mode, secret, Arc::new(SystemClock))
    }

    pub fn configured_with_clock(
        mode: Option<AuthMode>,
        secret: Option<&str>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        match (mode, non_empty(secret)) {
            (None, secret) => Ok(Self::with_clock(secret, clock)),
            (Some(AuthMode::Enforced), Some(secret)) => Ok(Self {
                mode: enforced(secret, clock),
            }),
            (Some(AuthMode::Enforced), None) => Err(ConfigError::MissingAppSecret),
            (Some(AuthMode::Disabled), _) => {
                tracing::warn!("App token validation is DISABLED by configuration");
                Ok(Self {
                    mode: AppAuthMode::Disabled,
                })
            }
        }
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self.mode, AppAuthMode::Enforced(_))
    }

    pub fn validate(&self, token: &str) -> Result<AppPrincipal, AuthError> {
        match &self.mode {
            AppAuthMode::Enforced(verifier) => verifier
                .verify::<AppClaims>(token, APP_TOKEN_TYPE)
                .map(AppPrincipal::Verified),
            AppAuthMode::Disabled => {
                tracing::warn!("Accepting app token without validation");
                Ok(AppPrincipal::Unverified)
            }
        }
    }
}

fn non_empty(secret: Option<&str>) -> Option<&str> {
    secret.filter(|s| !s.trim().is_empty())
}

fn enforced(secret: &str, clock: Arc<dyn Clock>) -> AppAuthMode {
    let key = Arc::new(SigningKey::hmac(secret.as_bytes(), None));
    AppAuthMode::Enforced(TokenVerifier::new(key).with_clock(clock))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::server::token::encode;

    const T: u64 = 1_706_400_000;

    fn claims(token_type: &str) -> AppClaims {
        AppClaims {
            sub: "ABC123".into(),
            serial_number: "A1B2C3D4".into(),
            device_id: "webex-display-C3D4".into(),
            pairing_code: "ABC123".into(),
            token_type: token_type.into(),
            iat: T,
            exp: T + 3600,
        }
    }

    fn validator() -> AppTokenValidator {
        AppTokenValidator::with_clock(Some("app-secret"), Arc::new(ManualClock::new(T + 10)))
    }

    #[test]
    fn valid_app_token_is_verified() {
        let token = encode(&SigningKey::hmac(b"app-secret", None), &claims("app_auth")).unwrap();
        match validator().validate(&token).unwrap() {
            AppPrincipal::Verified(c) => assert_eq!(c.pairing_code, "ABC123"),
            AppPrincipal::Unverified => panic!("expected verified principal"),
        }
    }

    #[test]
    fn wrong_type_with_valid_signature_is_rejected() {
        let token = encode(&SigningKey::hmac(b"app-secret", None), &claims("wrong_type")).unwrap();
        assert_eq!(validator().validate(&token), Err(AuthError::InvalidTokenType));
    }

    #[test]
    fn device_domain_secret_is_not_accepted() {
        let token =
            encode(&SigningKey::hmac(b"device-secret", None), &claims("app_auth")).unwrap();
        assert_eq!(
            validator().validate(&token),
            Err(AuthError::InvalidTokenSignature)
        );
    }

    #[test]
    fn device_token_is_rejected_by_type() {
        use crate::server::issuer::{TokenIssuer, TokenPolicy};
        use crate::server::registry::DeviceRecord;

        let device = DeviceRecord::new(
            "A1B2C3D4",
            "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2",
        );
        let token = TokenIssuer::new(
            Arc::new(SigningKey::hmac(b"app-secret", None)),
            TokenPolicy::default(),
        )
        .with_clock(Arc::new(ManualClock::new(T)))
        .issue_device_token(&device)
        .unwrap()
        .token;

        assert_eq!(validator().validate(&token), Err(AuthError::InvalidTokenType));
    }

    #[test]
    fn disabled_mode_accepts_anything() {
        let validator = AppTokenValidator::new(None);
        assert!(!validator.is_enforced());
        assert_eq!(validator.validate("garbage"), Ok(AppPrincipal::Unverified));

        assert!(!AppTokenValidator::new(Some("")).is_enforced());
    }

    #[test]
    fn explicit_enforced_mode_requires_a_secret() {
        assert!(matches!(
            AppTokenValidator::configured(Some(AuthMode::Enforced), None),
            Err(ConfigError::MissingAppSecret)
        ));
        assert!(matches!(
            AppTokenValidator::configured(Some(AuthMode::Enforced), Some("  ")),
            Err(ConfigError::MissingAppSecret)
        ));
        assert!(AppTokenValidator::configured(Some(AuthMode::Enforced), Some("app-secret"))
            .unwrap()
            .is_enforced());
    }

    #[test]
    fn explicit_disabled_mode_ignores_the_secret() {
        let validator =
            AppTokenValidator::configured(Some(AuthMode::Disabled), Some("app-secret")).unwrap();
        assert!(!validator.is_enforced());
    }

    #[test]
    fn unset_mode_is_derived_from_the_secret() {
        assert!(AppTokenValidator::configured(None, Some("app-secret"))
            .unwrap()
            .is_enforced());
        assert!(!AppTokenValidator::configured(None, None).unwrap().is_enforced());
    }
}
