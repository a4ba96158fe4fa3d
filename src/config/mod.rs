//! Configuration: TOML file, then environment overrides.

pub mod schema;

pub use schema::{
    Config, DeviceConfig, GatewayConfig, RegistryConfig, SignatureConfig, TokensConfig,
};

use crate::error::{ConfigError, Error};
use crate::server::issuer::MAX_TOKEN_TTL_SECS;
use crate::server::key_source::{select_private_jwk, RemoteKeySource};
use crate::server::keys::SigningKey;
use crate::server::validator::AuthMode;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// `~/.display-auth`
pub fn default_dir() -> Result<PathBuf> {
    use directories::UserDirs;

    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".display-auth"))
}

impl Config {
    /// Load from `path` (or the default location), then apply environment
    /// overrides. A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => default_dir()?.join("config.toml"),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?;
            toml::from_str::<Config>(&contents)
                .with_context(|| format!("Failed to parse config {}", config_path.display()))?
        } else {
            tracing::debug!(path = %config_path.display(), "No config file, using defaults");
            Config::default()
        };
        config.config_path = config_path;

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup. Empty values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DEVICE_JWT_SECRET") {
            self.tokens.jwt_secret = Some(v);
        }
        if let Some(v) = get("DEVICE_JWT_PRIVATE_JWK") {
            self.tokens.private_jwk = Some(v);
        }
        if let Some(v) = get("DEVICE_JWT_KID") {
            self.tokens.kid = Some(v);
        }
        if let Some(v) = get("DEVICE_JWT_JWK_URL") {
            self.tokens.jwk_url = Some(v);
        }
        if let Some(v) = get("APP_TOKEN_SECRET") {
            self.tokens.app_secret = Some(v);
        }
        if let Some(v) = get("DISPLAY_AUTH_DB") {
            self.registry.db_path = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.signature.window_secs == 0 {
            anyhow::bail!("signature.window_secs must be greater than zero");
        }
        if self.tokens.device_ttl_secs == 0 || self.tokens.app_ttl_secs == 0 {
            anyhow::bail!("token lifetimes must be greater than zero");
        }
        if self.tokens.device_ttl_secs > MAX_TOKEN_TTL_SECS
            || self.tokens.app_ttl_secs > MAX_TOKEN_TTL_SECS
        {
            anyhow::bail!("token lifetimes must not exceed {MAX_TOKEN_TTL_SECS} seconds");
        }
        if self.tokens.app_ttl_secs > self.tokens.device_ttl_secs {
            tracing::warn!(
                app_ttl = self.tokens.app_ttl_secs,
                device_ttl = self.tokens.device_ttl_secs,
                "App tokens outlive device tokens"
            );
        }
        if self.tokens.app_auth_mode == Some(AuthMode::Enforced) && self.app_secret().is_none() {
            return Err(ConfigError::MissingAppSecret)
                .context("tokens.app_auth_mode is \"enforced\"");
        }
        if let Some(mac) = &self.device.mac {
            parse_mac(mac)?;
        }
        Ok(())
    }

    /// The app token secret, ignoring empty values.
    pub fn app_secret(&self) -> Option<&str> {
        self.tokens
            .app_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
    }

    fn base_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn registry_path(&self) -> PathBuf {
        self.registry
            .db_path
            .clone()
            .unwrap_or_else(|| self.base_dir().join("devices.db"))
    }

    pub fn secret_dir(&self) -> PathBuf {
        self.device
            .secret_dir
            .clone()
            .unwrap_or_else(|| self.base_dir().join("device"))
    }

    /// Resolve the token signing key, fetching the private JWK remotely when
    /// only a URL is configured. Blocking; call before entering async code.
    pub fn signing_key(&self) -> std::result::Result<SigningKey, Error> {
        let tokens = &self.tokens;
        let fetched;
        let private_jwk = match (&tokens.private_jwk, &tokens.jwk_url) {
            (Some(jwk), _) => Some(jwk.as_str()),
            (None, Some(url)) => {
                let body = RemoteKeySource::new(url)
                    .with_bearer(tokens.jwk_url_token.clone())
                    .with_timeout(Duration::from_secs(tokens.jwk_fetch_timeout_secs))
                    .fetch()?;
                fetched = select_private_jwk(&body)?;
                Some(fetched.as_str())
            }
            (None, None) => None,
        };

        Ok(SigningKey::resolve(
            private_jwk,
            tokens.kid.as_deref(),
            tokens.jwt_secret.as_deref(),
        )?)
    }

    /// The configured hardware identifier, if any.
    pub fn device_mac(&self) -> Result<Option<[u8; 6]>> {
        self.device.mac.as_deref().map(parse_mac).transpose()
    }
}

/// Parse `AA:BB:CC:DD:EE:FF`, `AA-BB-...` or `AABBCCDDEEFF`.
pub fn parse_mac(raw: &str) -> Result<[u8; 6]> {
    let digits: String = raw
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    let bytes = hex::decode(&digits)
        .map_err(|_| ConfigError::Invalid(format!("device.mac \"{raw}\" is not hex")))?;
    <[u8; 6]>::try_from(bytes.as_slice())
        .map_err(|_| ConfigError::Invalid(format!("device.mac \"{raw}\" must be 6 bytes")).into())
}
