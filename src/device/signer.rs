//! HMAC-SHA256 request signing.
//!
//! The contract is fail-closed: any error means the request must not be sent.
//! There is no path that yields an empty or garbage signature.

use super::credentials::CredentialStore;
use crate::clock::{Clock, SystemClock};
use crate::crypto::{canonical_message, hmac_sha256_base64, sha256_hex, EMPTY_BODY_SHA256};
use crate::protocol::SignedRequest;

/// Earliest wall-clock time considered synchronized (2024-01-01T00:00:00Z).
/// A device that has not completed time sync reports something near the epoch.
pub const MIN_SYNCED_TIMESTAMP: u64 = 1_704_067_200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignError {
    #[error("cannot sign: device not provisioned")]
    NotProvisioned,
    #[error("cannot sign: clock not synchronized (now = {0})")]
    ClockNotSynced(u64),
}

/// Signs outgoing requests with the device's key hash.
pub struct RequestSigner<'a> {
    credentials: &'a CredentialStore,
    clock: &'a dyn Clock,
}

impl<'a> RequestSigner<'a> {
    pub fn new(credentials: &'a CredentialStore) -> Self {
        Self {
            credentials,
            clock: &SystemClock,
        }
    }

    pub fn with_clock(credentials: &'a CredentialStore, clock: &'a dyn Clock) -> Self {
        Self { credentials, clock }
    }

    /// Sign `serial:timestamp:sha256(body)` and return the base64 signature.
    pub fn sign(&self, timestamp: u64, body: &[u8]) -> Result<String, SignError> {
        let key_hash = match (self.credentials.is_provisioned(), self.credentials.key_hash()) {
            (true, Some(key_hash)) => key_hash,
            _ => {
                tracing::error!("Cannot sign - not provisioned");
                return Err(SignError::NotProvisioned);
            }
        };

        let message = canonical_message(self.credentials.serial_number(), timestamp, body);
        Ok(hmac_sha256_base64(key_hash, &message))
    }

    /// Sign `body` at the current wall-clock time.
    pub fn sign_now(&self, body: &[u8]) -> Result<SignedRequest, SignError> {
        let timestamp = self.clock.now_secs();
        if timestamp < MIN_SYNCED_TIMESTAMP {
            tracing::warn!(timestamp, "Refusing to sign with unsynchronized clock");
            return Err(SignError::ClockNotSynced(timestamp));
        }

        let signature = self.sign(timestamp, body)?;
        let body_hash = if body.is_empty() {
            EMPTY_BODY_SHA256.to_string()
        } else {
            sha256_hex(body)
        };

        Ok(SignedRequest {
            serial: self.credentials.serial_number().to_string(),
            timestamp,
            body_hash,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::verify_hmac_base64;
    use crate::device::credentials::StaticHardware;
    use crate::device::secret_store::MemorySecretStore;
    use std::sync::Arc;

    fn provisioned() -> CredentialStore {
        let mut creds = CredentialStore::new(
            Arc::new(MemorySecretStore::new()),
            Arc::new(StaticHardware::new([1, 2, 3, 4, 5, 6])),
        );
        creds.begin().unwrap();
        creds
    }

    #[test]
    fn unprovisioned_store_refuses_to_sign() {
        let creds = CredentialStore::new(
            Arc::new(MemorySecretStore::new()),
            Arc::new(StaticHardware::new([1, 2, 3, 4, 5, 6])),
        );
        let signer = RequestSigner::new(&creds);
        assert_eq!(signer.sign(1_706_400_000, b""), Err(SignError::NotProvisioned));
    }

    #[test]
    fn signature_verifies_against_canonical_message() {
        let creds = provisioned();
        let signer = RequestSigner::new(&creds);

        let sig = signer.sign(1_706_400_000, br#"{"rssi":-65}"#).unwrap();
        let message = canonical_message(creds.serial_number(), 1_706_400_000, br#"{"rssi":-65}"#);
        assert!(verify_hmac_base64(creds.key_hash().unwrap(), &message, &sig));
        assert_eq!(sig.len(), 44);
    }

    #[test]
    fn signing_is_deterministic() {
        let creds = provisioned();
        let signer = RequestSigner::new(&creds);
        assert_eq!(
            signer.sign(1_706_400_000, b"body").unwrap(),
            signer.sign(1_706_400_000, b"body").unwrap()
        );
        assert_ne!(
            signer.sign(1_706_400_000, b"body").unwrap(),
            signer.sign(1_706_400_001, b"body").unwrap()
        );
    }

    #[test]
    fn sign_now_uses_clock_and_empty_body_hash() {
        let creds = provisioned();
        let clock = ManualClock::new(1_706_400_000);
        let signer = RequestSigner::with_clock(&creds, &clock);

        let req = signer.sign_now(b"").unwrap();
        assert_eq!(req.timestamp, 1_706_400_000);
        assert_eq!(req.body_hash, EMPTY_BODY_SHA256);
        assert_eq!(req.serial, creds.serial_number());
        assert_eq!(req.signature, signer.sign(1_706_400_000, b"").unwrap());
    }

    #[test]
    fn sign_now_refuses_unsynced_clock() {
        let creds = provisioned();
        let clock = ManualClock::new(86_400);
        let signer = RequestSigner::with_clock(&creds, &clock);
        assert_eq!(signer.sign_now(b""), Err(SignError::ClockNotSynced(86_400)));
    }
}
