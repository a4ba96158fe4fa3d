//! Bearer token verification.
//!
//! The same pipeline serves device and app tokens; the claim shape is chosen
//! by the caller through [`TypedClaims`].

use super::keys::SigningKey;
use super::token::{decode, DeviceClaims, TypedClaims};
use crate::clock::{Clock, SystemClock};
use crate::crypto::b64url_decode;
use crate::error::AuthError;
use crate::protocol::DEVICE_TOKEN_TYPE;
use std::sync::Arc;

pub struct TokenVerifier {
    key: Arc<SigningKey>,
    clock: Arc<dyn Clock>,
}

impl TokenVerifier {
    pub fn new(key: Arc<SigningKey>) -> Self {
        Self {
            key,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verify a compact token and return its claims.
    ///
    /// Order: structure, decoding, declared type, expiry, then the header's
    /// algorithm and key id against the key material, then the signature.
    /// Claims are only returned once every check has passed.
    pub fn verify<C: TypedClaims>(&self, token: &str, expected_type: &str) -> Result<C, AuthError> {
        let decoded = decode::<C>(token)?;

        if decoded.claims.token_type() != expected_type {
            tracing::debug!(
                got = decoded.claims.token_type(),
                expected = expected_type,
                "Token type mismatch"
            );
            return Err(AuthError::InvalidTokenType);
        }

        if decoded.claims.expires_at() <= self.clock.now_secs() {
            return Err(AuthError::TokenExpired);
        }

        if decoded.header.alg != self.key.algorithm().as_str() {
            tracing::warn!(alg = %decoded.header.alg, "Token signed with unexpected algorithm");
            return Err(AuthError::InvalidTokenSignature);
        }
        if let Some(kid) = self.key.kid() {
            if decoded.header.kid.as_deref() != Some(kid) {
                tracing::warn!(kid = ?decoded.header.kid, "Token signed with unknown key id");
                return Err(AuthError::InvalidTokenSignature);
            }
        }

        let signature = b64url_decode(decoded.signature).ok_or(AuthError::InvalidTokenSignature)?;
        if !self.key.verify(decoded.signing_input.as_bytes(), &signature) {
            return Err(AuthError::InvalidTokenSignature);
        }

        Ok(decoded.claims)
    }

    /// Verify a device bearer token.
    pub fn verify_device_token(&self, token: &str) -> Result<DeviceClaims, AuthError> {
        self.verify::<DeviceClaims>(token, DEVICE_TOKEN_TYPE)
    }
}

/// Strip the `Bearer ` scheme from an `Authorization` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
