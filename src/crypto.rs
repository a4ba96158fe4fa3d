//! Canonical message construction and the hash/HMAC primitives both runtimes
//! must agree on byte-for-byte.
//!
//! `message = serial + ":" + timestamp + ":" + sha256_hex(body)`
//! `signature = base64(HMAC-SHA256(key = key_hash ascii bytes, message))`

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of the empty string, used for bodiless requests.
pub const EMPTY_BODY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Build the canonical signed message. Exactly two colons, no whitespace.
pub fn canonical_message(serial: &str, timestamp: u64, body: &[u8]) -> String {
    let body_hash = if body.is_empty() {
        EMPTY_BODY_SHA256.to_string()
    } else {
        sha256_hex(body)
    };
    format!("{serial}:{timestamp}:{body_hash}")
}

/// HMAC-SHA256 of `message` keyed with the key hash, standard base64.
pub fn hmac_sha256_base64(key_hash: &str, message: &str) -> String {
    // An empty signature never verifies
    let Ok(mut mac) = HmacSha256::new_from_slice(key_hash.as_bytes()) else {
        return String::new();
    };
    mac.update(message.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Verify a base64 HMAC in constant time. Accepts standard or URL-safe
/// alphabets; anything undecodable fails.
pub fn verify_hmac_base64(key_hash: &str, message: &str, signature: &str) -> bool {
    let Some(supplied) = decode_signature(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key_hash.as_bytes()) else {
        return false;
    };
    mac.update(message.as_bytes());
    mac.verify_slice(&supplied).is_ok()
}

fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    let trimmed = signature.trim();
    STANDARD
        .decode(trimmed)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE.decode(trimmed))
        .or_else(|_| URL_SAFE_NO_PAD.decode(trimmed))
        .ok()
}

pub(crate) fn b64url_encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub(crate) fn b64url_decode(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_hash_matches_constant() {
        assert_eq!(sha256_hex(b""), EMPTY_BODY_SHA256);
    }

    #[test]
    fn canonical_message_for_empty_body() {
        assert_eq!(
            canonical_message("A1B2C3D4", 1_706_400_000, b""),
            "A1B2C3D4:1706400000:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn canonical_message_has_exactly_two_colons() {
        let msg = canonical_message("A1B2C3D4", 42, br#"{"rssi":-65}"#);
        assert_eq!(msg.matches(':').count(), 2);
        assert!(msg.ends_with(&sha256_hex(br#"{"rssi":-65}"#)));
    }

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_sha256_base64("key", "A1B2C3D4:1:abc");
        let b = hmac_sha256_base64("key", "A1B2C3D4:1:abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 44);
    }

    #[test]
    fn hmac_known_vector() {
        let sig = hmac_sha256_base64("key", "The quick brown fox jumps over the lazy dog");
        let raw = STANDARD.decode(sig).unwrap();
        assert_eq!(
            hex::encode(raw),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn verify_accepts_both_alphabets() {
        let sig = hmac_sha256_base64("k", "m");
        assert!(verify_hmac_base64("k", "m", &sig));
        let url = sig.replace('+', "-").replace('/', "_");
        assert!(verify_hmac_base64("k", "m", &url));
        assert!(verify_hmac_base64("k", "m", url.trim_end_matches('=')));
    }

    #[test]
    fn verify_rejects_garbage_and_wrong_key() {
        let sig = hmac_sha256_base64("k", "m");
        assert!(!verify_hmac_base64("other", "m", &sig));
        assert!(!verify_hmac_base64("k", "m", "not base64!!"));
        assert!(!verify_hmac_base64("k", "m", ""));
    }
}
