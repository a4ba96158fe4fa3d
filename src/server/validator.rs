//! Server-side HMAC request validation with replay protection.
//!
//! Checks short-circuit in a fixed order: device lookup, signature,
//! timestamp window, replay floor, then the atomic floor advance.

use super::registry::{DeviceRecord, DeviceRegistry};
use crate::clock::{Clock, SystemClock};
use crate::crypto::{canonical_message, verify_hmac_base64};
use crate::error::{AuthError, Result};
use crate::protocol::{RequestHeaders, TIMESTAMP_WINDOW_SECS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether signatures are checked at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    Enforced,
    /// Lookup only. Must be selected explicitly in configuration.
    Disabled,
}

pub struct SignatureValidator {
    registry: Arc<dyn DeviceRegistry>,
    clock: Arc<dyn Clock>,
    mode: AuthMode,
    window_secs: u64,
}

impl SignatureValidator {
    pub fn new(registry: Arc<dyn DeviceRegistry>, mode: AuthMode) -> Self {
        if mode == AuthMode::Disabled {
            tracing::warn!("HMAC signature validation is DISABLED by configuration");
        }
        Self {
            registry,
            clock: Arc::new(SystemClock),
            mode,
            window_secs: TIMESTAMP_WINDOW_SECS,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    /// Validate one signed request and return the device record with the
    /// advanced replay floor.
    pub fn validate(
        &self,
        serial: &str,
        timestamp: u64,
        signature: &str,
        body: &[u8],
    ) -> Result<DeviceRecord> {
        let Some(mut device) = self.registry.find_by_serial(serial)? else {
            tracing::warn!(serial, "Signed request from unknown device");
            return Err(AuthError::DeviceNotFound.into());
        };

        if self.mode == AuthMode::Disabled {
            tracing::warn!(serial, "Accepting request without signature check (auth disabled)");
            return Ok(device);
        }

        let message = canonical_message(serial, timestamp, body);
        if !verify_hmac_base64(&device.key_hash, &message, signature) {
            tracing::warn!(serial, "Invalid request signature");
            return Err(AuthError::InvalidSignature.into());
        }

        let now = self.clock.now_secs();
        if now.abs_diff(timestamp) > self.window_secs {
            tracing::warn!(serial, timestamp, now, "Request timestamp outside window");
            return Err(AuthError::TimestampExpired.into());
        }

        if timestamp <= device.replay_floor {
            tracing::warn!(serial, timestamp, floor = device.replay_floor, "Replay detected");
            return Err(AuthError::ReplayDetected.into());
        }

        // Lost a race with a concurrent request carrying the same or a later timestamp
        if !self.registry.advance_replay_floor(serial, timestamp)? {
            tracing::warn!(serial, timestamp, "Replay detected (concurrent)");
            return Err(AuthError::ReplayDetected.into());
        }

        device.replay_floor = timestamp;
        tracing::debug!(serial, timestamp, "Signed request accepted");
        Ok(device)
    }

    /// Parse the three authentication headers, then [`Self::validate`].
    pub fn validate_headers(&self, headers: &RequestHeaders, body: &[u8]) -> Result<DeviceRecord> {
        let (Some(serial), Some(timestamp), Some(signature)) = (
            headers.serial.as_deref(),
            headers.timestamp.as_deref(),
            headers.signature.as_deref(),
        ) else {
            return Err(AuthError::MissingCredentials.into());
        };

        let timestamp = parse_timestamp(timestamp).ok_or(AuthError::MalformedTimestamp)?;
        self.validate(serial.trim(), timestamp, signature, body)
    }
}

/// Canonical decimal only: digits, no sign, no leading zero. The header
/// must render back to the exact bytes the device signed.
fn parse_timestamp(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crypto::hmac_sha256_base64;
    use crate::error::Error;
    use crate::server::registry::MemoryDeviceRegistry;

    const SERIAL: &str = "A1B2C3D4";
    const KEY_HASH: &str = "a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2";
    const NOW: u64 = 1_706_400_000;

    fn setup(mode: AuthMode) -> (SignatureValidator, Arc<MemoryDeviceRegistry>, Arc<ManualClock>) {
        let registry = Arc::new(MemoryDeviceRegistry::new());
        registry.register(DeviceRecord::new(SERIAL, KEY_HASH));
        let clock = Arc::new(ManualClock::new(NOW));
        let validator =
            SignatureValidator::new(registry.clone(), mode).with_clock(clock.clone());
        (validator, registry, clock)
    }

    fn sign(timestamp: u64, body: &[u8]) -> String {
        hmac_sha256_base64(KEY_HASH, &canonical_message(SERIAL, timestamp, body))
    }

    fn auth_err(result: Result<DeviceRecord>) -> AuthError {
        match result {
            Err(Error::Auth(e)) => e,
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[test]
    fn valid_request_advances_floor() {
        let (validator, registry, _) = setup(AuthMode::Enforced);
        let device = validator.validate(SERIAL, NOW, &sign(NOW, b"{}"), b"{}").unwrap();
        assert_eq!(device.replay_floor, NOW);
        assert_eq!(
            registry.find_by_serial(SERIAL).unwrap().unwrap().replay_floor,
            NOW
        );
    }

    #[test]
    fn unknown_device_is_rejected_first() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let err = auth_err(validator.validate("FFFFFFFF", NOW, "garbage", b""));
        assert_eq!(err, AuthError::DeviceNotFound);
    }

    #[test]
    fn bad_signature_beats_bad_timestamp() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let err = auth_err(validator.validate(SERIAL, NOW - 10_000, "AAAA", b""));
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[test]
    fn tampered_body_fails() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let err = auth_err(validator.validate(SERIAL, NOW, &sign(NOW, b"a"), b"b"));
        assert_eq!(err, AuthError::InvalidSignature);
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let ts = NOW - 300;
        assert!(validator.validate(SERIAL, ts, &sign(ts, b""), b"").is_ok());

        let (validator, _, _) = setup(AuthMode::Enforced);
        let ts = NOW - 301;
        let err = auth_err(validator.validate(SERIAL, ts, &sign(ts, b""), b""));
        assert_eq!(err, AuthError::TimestampExpired);

        let (validator, _, _) = setup(AuthMode::Enforced);
        let ts = NOW + 301;
        let err = auth_err(validator.validate(SERIAL, ts, &sign(ts, b""), b""));
        assert_eq!(err, AuthError::TimestampExpired);
    }

    #[test]
    fn replay_and_older_timestamps_are_rejected() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let sig = sign(NOW, b"");
        validator.validate(SERIAL, NOW, &sig, b"").unwrap();

        let err = auth_err(validator.validate(SERIAL, NOW, &sig, b""));
        assert_eq!(err, AuthError::ReplayDetected);

        let older = NOW - 1;
        let err = auth_err(validator.validate(SERIAL, older, &sign(older, b""), b""));
        assert_eq!(err, AuthError::ReplayDetected);

        let newer = NOW + 1;
        assert!(validator.validate(SERIAL, newer, &sign(newer, b""), b"").is_ok());
    }

    #[test]
    fn disabled_mode_still_requires_known_device() {
        let (validator, registry, _) = setup(AuthMode::Disabled);
        assert!(validator.validate(SERIAL, 0, "not a signature", b"").is_ok());
        assert_eq!(
            registry.find_by_serial(SERIAL).unwrap().unwrap().replay_floor,
            0
        );
        let err = auth_err(validator.validate("FFFFFFFF", NOW, "", b""));
        assert_eq!(err, AuthError::DeviceNotFound);
    }

    #[test]
    fn headers_are_parsed() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let headers = RequestHeaders {
            serial: Some(SERIAL.into()),
            timestamp: Some(NOW.to_string()),
            signature: Some(sign(NOW, b"x")),
        };
        assert!(validator.validate_headers(&headers, b"x").is_ok());
    }

    #[test]
    fn missing_or_malformed_headers() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let missing = RequestHeaders {
            serial: Some(SERIAL.into()),
            ..RequestHeaders::default()
        };
        assert_eq!(
            auth_err(validator.validate_headers(&missing, b"")),
            AuthError::MissingCredentials
        );

        for bad in ["", "-5", "12a", "1.5"] {
            let headers = RequestHeaders {
                serial: Some(SERIAL.into()),
                timestamp: Some(bad.into()),
                signature: Some("sig".into()),
            };
            assert_eq!(
                auth_err(validator.validate_headers(&headers, b"")),
                AuthError::MalformedTimestamp
            );
        }
    }

    #[test]
    fn zero_padded_timestamp_is_malformed() {
        let (validator, _, _) = setup(AuthMode::Enforced);
        let padded = format!("0{NOW}");
        let headers = RequestHeaders {
            serial: Some(SERIAL.into()),
            timestamp: Some(padded),
            signature: Some(sign(NOW, b"")),
        };
        assert_eq!(
            auth_err(validator.validate_headers(&headers, b"")),
            AuthError::MalformedTimestamp
        );

        assert_eq!(parse_timestamp("0"), Some(0));
        assert_eq!(parse_timestamp(&NOW.to_string()), Some(NOW));
    }
}
