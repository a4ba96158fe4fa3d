use crate::server::issuer::{DEFAULT_APP_TOKEN_TTL_SECS, DEFAULT_DEVICE_TOKEN_TTL_SECS};
use crate::server::token::IdentityKey;
use crate::server::validator::AuthMode;
use crate::protocol::TIMESTAMP_WINDOW_SECS;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, `~/.display-auth/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where this config was loaded from (not serialized).
    #[serde(skip)]
    pub config_path: PathBuf,
    pub tokens: TokensConfig,
    pub signature: SignatureConfig,
    pub registry: RegistryConfig,
    pub gateway: GatewayConfig,
    pub device: DeviceConfig,
}

// ── Tokens ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensConfig {
    /// Shared HS256 secret (`DEVICE_JWT_SECRET`).
    pub jwt_secret: Option<String>,
    /// Private JWK as JSON text (`DEVICE_JWT_PRIVATE_JWK`).
    pub private_jwk: Option<String>,
    /// Key id for asymmetric keys (`DEVICE_JWT_KID`).
    pub kid: Option<String>,
    /// Endpoint serving the private JWK (`DEVICE_JWT_JWK_URL`).
    pub jwk_url: Option<String>,
    /// Bearer token for `jwk_url`.
    pub jwk_url_token: Option<String>,
    pub jwk_fetch_timeout_secs: u64,
    /// App token HS256 secret (`APP_TOKEN_SECRET`).
    pub app_secret: Option<String>,
    /// `enforced` or `disabled`. Unset derives the posture from whether
    /// `app_secret` is present.
    pub app_auth_mode: Option<AuthMode>,
    pub device_ttl_secs: u64,
    pub app_ttl_secs: u64,
    /// `device_uuid` or `pairing_code`.
    pub identity_key: IdentityKey,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            private_jwk: None,
            kid: None,
            jwk_url: None,
            jwk_url_token: None,
            jwk_fetch_timeout_secs: 10,
            app_secret: None,
            app_auth_mode: None,
            device_ttl_secs: DEFAULT_DEVICE_TOKEN_TTL_SECS,
            app_ttl_secs: DEFAULT_APP_TOKEN_TTL_SECS,
            identity_key: IdentityKey::DeviceUuid,
        }
    }
}

// ── Signature validation ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// `enforced` or `disabled`.
    pub mode: AuthMode,
    pub window_secs: u64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Enforced,
            window_secs: TIMESTAMP_WINDOW_SECS,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// SQLite file (`DISPLAY_AUTH_DB`). Defaults to `devices.db` next to the config.
    pub db_path: Option<PathBuf>,
}

// ── Gateway ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    /// Public client key returned to devices in the auth response.
    pub anon_key: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
            max_body_bytes: 64 * 1024,
            request_timeout_secs: 30,
            anon_key: None,
        }
    }
}

// ── Device emulator ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Directory for the file-backed secret store. Defaults to `device/`
    /// next to the config.
    pub secret_dir: Option<PathBuf>,
    /// Fixed hardware identifier, 12 hex digits. Defaults to one derived
    /// from the host.
    pub mac: Option<String>,
}
