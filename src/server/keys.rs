//! Token signing key material.
//!
//! The key is resolved once at startup and shared behind an `Arc`. Selection
//! order: asymmetric private JWK (EC P-256 gives ES256, RSA gives RS256, a key
//! id is mandatory), then a shared HMAC secret (HS256), else a configuration
//! error.

use crate::crypto::b64url_decode;
use crate::error::ConfigError;
use ring::rand::SystemRandom;
use ring::{hmac, rsa, signature};
use serde::Deserialize;
use std::fmt;

/// JWS algorithm recorded in the token header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    HS256,
    ES256,
    RS256,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::ES256 => "ES256",
            Self::RS256 => "RS256",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Private JSON Web Key. Only the members needed for EC P-256 and RSA.
#[derive(Clone, Default, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
    #[serde(default)]
    pub d: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub p: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub dp: Option<String>,
    #[serde(default)]
    pub dq: Option<String>,
    #[serde(default)]
    pub qi: Option<String>,
}

impl fmt::Debug for Jwk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Jwk")
            .field("kty", &self.kty)
            .field("kid", &self.kid)
            .field("crv", &self.crv)
            .finish_non_exhaustive()
    }
}

impl Jwk {
    fn member(&self, name: &str, value: &Option<String>) -> Result<Vec<u8>, ConfigError> {
        let raw = value
            .as_deref()
            .ok_or_else(|| ConfigError::MalformedKey(format!("JWK missing \"{name}\"")))?;
        b64url_decode(raw)
            .ok_or_else(|| ConfigError::MalformedKey(format!("JWK \"{name}\" is not base64url")))
    }
}

pub enum SigningKey {
    Hmac {
        key: hmac::Key,
        kid: Option<String>,
    },
    Ec {
        kid: String,
        key_pair: signature::EcdsaKeyPair,
        /// Uncompressed SEC1 point, `0x04 || x || y`.
        public_key: Vec<u8>,
        rng: SystemRandom,
    },
    Rsa {
        kid: String,
        key_pair: signature::RsaKeyPair,
        n: Vec<u8>,
        e: Vec<u8>,
        rng: SystemRandom,
    },
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("alg", &self.algorithm())
            .field("kid", &self.kid())
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Pick the signing key from whatever material is configured.
    pub fn resolve(
        private_jwk: Option<&str>,
        kid: Option<&str>,
        hmac_secret: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let private_jwk = private_jwk.map(str::trim).filter(|s| !s.is_empty());
        let hmac_secret = hmac_secret.filter(|s| !s.is_empty());

        let key = match (private_jwk, hmac_secret) {
            (Some(json), _) => Self::from_jwk_json(json, kid)?,
            (None, Some(secret)) => Self::hmac(secret.as_bytes(), kid.map(str::to_string)),
            (None, None) => return Err(ConfigError::MissingSigningKey),
        };

        tracing::info!(alg = %key.algorithm(), kid = key.kid().unwrap_or("-"), "Token signing key loaded");
        Ok(key)
    }

    pub fn hmac(secret: &[u8], kid: Option<String>) -> Self {
        Self::Hmac {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
            kid,
        }
    }

    pub fn from_jwk_json(json: &str, kid: Option<&str>) -> Result<Self, ConfigError> {
        let jwk: Jwk = serde_json::from_str(json)
            .map_err(|e| ConfigError::MalformedKey(format!("private JWK is not valid JSON: {e}")))?;
        Self::from_jwk(&jwk, kid)
    }

    /// Import a private JWK. An explicit `kid` wins over the one in the JWK.
    pub fn from_jwk(jwk: &Jwk, kid: Option<&str>) -> Result<Self, ConfigError> {
        let kid = kid
            .or(jwk.kid.as_deref())
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingKeyId)?
            .to_string();

        match jwk.kty.as_str() {
            "EC" => Self::import_ec(jwk, kid),
            "RSA" => Self::import_rsa(jwk, kid),
            other => Err(ConfigError::UnsupportedKey(format!("JWK kty \"{other}\""))),
        }
    }

    fn import_ec(jwk: &Jwk, kid: String) -> Result<Self, ConfigError> {
        match jwk.crv.as_deref() {
            Some("P-256") => {}
            other => {
                return Err(ConfigError::UnsupportedKey(format!(
                    "EC curve {:?}; only P-256 is supported",
                    other.unwrap_or("none")
                )))
            }
        }

        let x = jwk.member("x", &jwk.x)?;
        let y = jwk.member("y", &jwk.y)?;
        let d = zeroize::Zeroizing::new(jwk.member("d", &jwk.d)?);
        if x.len() != 32 || y.len() != 32 || d.len() != 32 {
            return Err(ConfigError::MalformedKey(
                "P-256 coordinates must be 32 bytes".into(),
            ));
        }

        let mut public_key = Vec::with_capacity(65);
        public_key.push(0x04);
        public_key.extend_from_slice(&x);
        public_key.extend_from_slice(&y);

        let rng = SystemRandom::new();
        let key_pair = signature::EcdsaKeyPair::from_private_key_and_public_key(
            &signature::ECDSA_P256_SHA256_FIXED_SIGNING,
            &d,
            &public_key,
            &rng,
        )
        .map_err(|e| ConfigError::MalformedKey(format!("EC key rejected: {e}")))?;

        Ok(Self::Ec {
            kid,
            key_pair,
            public_key,
            rng,
        })
    }

    fn import_rsa(jwk: &Jwk, kid: String) -> Result<Self, ConfigError> {
        let n = jwk.member("n", &jwk.n)?;
        let e = jwk.member("e", &jwk.e)?;
        let d = zeroize::Zeroizing::new(jwk.member("d", &jwk.d)?);
        let p = zeroize::Zeroizing::new(jwk.member("p", &jwk.p)?);
        let q = zeroize::Zeroizing::new(jwk.member("q", &jwk.q)?);
        let dp = zeroize::Zeroizing::new(jwk.member("dp", &jwk.dp)?);
        let dq = zeroize::Zeroizing::new(jwk.member("dq", &jwk.dq)?);
        let qi = zeroize::Zeroizing::new(jwk.member("qi", &jwk.qi)?);

        let components = rsa::KeyPairComponents {
            public_key: rsa::PublicKeyComponents {
                n: n.as_slice(),
                e: e.as_slice(),
            },
            d: d.as_slice(),
            p: p.as_slice(),
            q: q.as_slice(),
            dP: dp.as_slice(),
            dQ: dq.as_slice(),
            qInv: qi.as_slice(),
        };
        let key_pair = signature::RsaKeyPair::from_components(&components)
            .map_err(|e| ConfigError::MalformedKey(format!("RSA key rejected: {e}")))?;

        Ok(Self::Rsa {
            kid,
            key_pair,
            n,
            e,
            rng: SystemRandom::new(),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::Hmac { .. } => Algorithm::HS256,
            Self::Ec { .. } => Algorithm::ES256,
            Self::Rsa { .. } => Algorithm::RS256,
        }
    }

    pub fn kid(&self) -> Option<&str> {
        match self {
            Self::Hmac { kid, .. } => kid.as_deref(),
            Self::Ec { kid, .. } | Self::Rsa { kid, .. } => Some(kid),
        }
    }

    /// Sign the JWS signing input.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, ConfigError> {
        match self {
            Self::Hmac { key, .. } => Ok(hmac::sign(key, message).as_ref().to_vec()),
            Self::Ec { key_pair, rng, .. } => key_pair
                .sign(rng, message)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| ConfigError::Signing),
            Self::Rsa { key_pair, rng, .. } => {
                let mut sig = vec![0u8; key_pair.public().modulus_len()];
                key_pair
                    .sign(&signature::RSA_PKCS1_SHA256, rng, message, &mut sig)
                    .map_err(|_| ConfigError::Signing)?;
                Ok(sig)
            }
        }
    }

    /// Verify a signature produced by [`Self::sign`] with the same material.
    pub fn verify(&self, message: &[u8], sig: &[u8]) -> bool {
        match self {
            Self::Hmac { key, .. } => hmac::verify(key, message, sig).is_ok(),
            Self::Ec { public_key, .. } => {
                signature::UnparsedPublicKey::new(&signature::ECDSA_P256_SHA256_FIXED, public_key)
                    .verify(message, sig)
                    .is_ok()
            }
            Self::Rsa { n, e, .. } => signature::RsaPublicKeyComponents { n, e }
                .verify(&signature::RSA_PKCS1_2048_8192_SHA256, message, sig)
                .is_ok(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_keys::{ec_jwk, ec_jwk_json, rsa_jwk_json};
    use super::*;

    #[test]
    fn hmac_secret_selects_hs256() {
        let key = SigningKey::resolve(None, None, Some("super-secret")).unwrap();
        assert_eq!(key.algorithm(), Algorithm::HS256);
        assert_eq!(key.kid(), None);

        let sig = key.sign(b"header.payload").unwrap();
        assert_eq!(sig.len(), 32);
        assert!(key.verify(b"header.payload", &sig));
        assert!(!key.verify(b"header.payload2", &sig));
    }

    #[test]
    fn nothing_configured_is_config_error() {
        assert!(matches!(
            SigningKey::resolve(None, None, None),
            Err(ConfigError::MissingSigningKey)
        ));
        assert!(matches!(
            SigningKey::resolve(Some("  "), None, Some("")),
            Err(ConfigError::MissingSigningKey)
        ));
    }

    #[test]
    fn ec_jwk_takes_precedence_over_hmac() {
        let json = ec_jwk_json(Some("key-1"));
        let key = SigningKey::resolve(Some(&json), None, Some("fallback")).unwrap();
        assert_eq!(key.algorithm(), Algorithm::ES256);
        assert_eq!(key.kid(), Some("key-1"));

        let sig = key.sign(b"signing input").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(key.verify(b"signing input", &sig));
        assert!(!key.verify(b"other input", &sig));
    }

    #[test]
    fn explicit_kid_overrides_jwk_kid() {
        let key = SigningKey::from_jwk(&ec_jwk(Some("in-jwk")), Some("from-env")).unwrap();
        assert_eq!(key.kid(), Some("from-env"));
    }

    #[test]
    fn asymmetric_key_without_kid_is_rejected() {
        assert!(matches!(
            SigningKey::from_jwk(&ec_jwk(None), None),
            Err(ConfigError::MissingKeyId)
        ));
    }

    #[test]
    fn mismatched_ec_public_key_is_rejected() {
        let mut jwk = ec_jwk(Some("k"));
        jwk.y = ec_jwk(None).y;
        assert!(matches!(
            SigningKey::from_jwk(&jwk, None),
            Err(ConfigError::MalformedKey(_))
        ));
    }

    #[test]
    fn unsupported_keys() {
        let mut jwk = ec_jwk(Some("k"));
        jwk.crv = Some("P-384".into());
        assert!(matches!(
            SigningKey::from_jwk(&jwk, None),
            Err(ConfigError::UnsupportedKey(_))
        ));

        let oct = Jwk {
            kty: "oct".into(),
            kid: Some("k".into()),
            ..Jwk::default()
        };
        assert!(matches!(
            SigningKey::from_jwk(&oct, None),
            Err(ConfigError::UnsupportedKey(_))
        ));
    }

    #[test]
    fn rsa_jwk_selects_rs256() {
        let json = rsa_jwk_json();
        let key = SigningKey::resolve(Some(&json), Some("rsa-1"), Some("fallback")).unwrap();
        assert_eq!(key.algorithm(), Algorithm::RS256);
        assert_eq!(key.kid(), Some("rsa-1"));

        let sig = key.sign(b"signing input").unwrap();
        assert_eq!(sig.len(), 256);
        assert!(key.verify(b"signing input", &sig));
        assert!(!key.verify(b"other input", &sig));
    }

    #[test]
    fn incomplete_rsa_key_is_malformed() {
        let rsa = Jwk {
            kty: "RSA".into(),
            kid: Some("k".into()),
            n: Some("AQAB".into()),
            e: Some("AQAB".into()),
            ..Jwk::default()
        };
        assert!(matches!(
            SigningKey::from_jwk(&rsa, None),
            Err(ConfigError::MalformedKey(_))
        ));
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            SigningKey::resolve(Some("{not json"), Some("k"), None),
            Err(ConfigError::MalformedKey(_))
        ));
    }

    #[test]
    fn debug_output_hides_material() {
        let key = SigningKey::hmac(b"topsecret", Some("k".into()));
        let rendered = format!("{key:?}");
        assert!(rendered.contains("HS256"));
        assert!(!rendered.contains("topsecret"));
    }
}
