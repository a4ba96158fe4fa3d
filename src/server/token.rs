//! Compact token codec and claim shapes.
//!
//! Wire form: `base64url(header).base64url(claims).base64url(signature)`,
//! unpadded, header `{alg, typ: "JWT", kid?}`.

use super::keys::SigningKey;
use crate::crypto::{b64url_decode, b64url_encode};
use crate::error::{AuthError, ConfigError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

/// Which device identifier becomes the token subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    #[default]
    DeviceUuid,
    /// Legacy deployments keyed on the pairing code.
    PairingCode,
}

/// Claims carried by device tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub sub: String,
    #[serde(alias = "serial")]
    pub serial_number: String,
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default)]
    pub token_type: String,
    pub iat: u64,
    pub exp: u64,
}

/// Claims carried by companion-app tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppClaims {
    pub sub: String,
    #[serde(alias = "serial")]
    pub serial_number: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub pairing_code: String,
    #[serde(rename = "type", default)]
    pub token_type: String,
    pub iat: u64,
    pub exp: u64,
}

/// A claim set that declares its own type and expiry.
pub trait TypedClaims: DeserializeOwned {
    fn token_type(&self) -> &str;
    fn expires_at(&self) -> u64;
}

impl TypedClaims for DeviceClaims {
    fn token_type(&self) -> &str {
        &self.token_type
    }

    fn expires_at(&self) -> u64 {
        self.exp
    }
}

impl TypedClaims for AppClaims {
    fn token_type(&self) -> &str {
        &self.token_type
    }

    fn expires_at(&self) -> u64 {
        self.exp
    }
}

/// Serialize and sign a claim set.
pub fn encode<C: Serialize>(key: &SigningKey, claims: &C) -> Result<String, ConfigError> {
    let header = Header {
        alg: key.algorithm().as_str().to_string(),
        typ: Some("JWT".into()),
        kid: key.kid().map(str::to_string),
    };
    let header = serde_json::to_vec(&header).map_err(|_| ConfigError::Signing)?;
    let claims = serde_json::to_vec(claims).map_err(|_| ConfigError::Signing)?;

    let signing_input = format!("{}.{}", b64url_encode(&header), b64url_encode(&claims));
    let signature = key.sign(signing_input.as_bytes())?;
    Ok(format!("{signing_input}.{}", b64url_encode(&signature)))
}

/// A token split into its parts, header and claims decoded but untrusted.
pub(crate) struct Decoded<'a, C> {
    pub header: Header,
    pub claims: C,
    pub signing_input: &'a str,
    pub signature: &'a str,
}

/// Split and decode without checking anything but structure.
pub(crate) fn decode<C: DeserializeOwned>(token: &str) -> Result<Decoded<'_, C>, AuthError> {
    let token = token.trim();
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(AuthError::InvalidTokenFormat);
    }

    let header = b64url_decode(segments[0])
        .and_then(|raw| serde_json::from_slice::<Header>(&raw).ok())
        .ok_or(AuthError::InvalidToken)?;
    let claims = b64url_decode(segments[1])
        .and_then(|raw| serde_json::from_slice::<C>(&raw).ok())
        .ok_or(AuthError::InvalidToken)?;

    let signing_input_len = segments[0].len() + 1 + segments[1].len();
    Ok(Decoded {
        header,
        claims,
        signing_input: &token[..signing_input_len],
        signature: segments[2],
    })
}
