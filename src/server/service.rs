//! Request/response exchanges built on the validator and issuer.
//!
//! - device-auth: HMAC-signed request in, device token and device profile out
//! - app-auth: HMAC-signed request naming a pairing code, app token out

use super::issuer::TokenIssuer;
use super::registry::DeviceRegistry;
use super::validator::SignatureValidator;
use crate::error::{AuthError, Result};
use crate::protocol::{AuthResponse, RequestHeaders};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AppAuthRequest {
    pairing_code: String,
}

pub struct DeviceAuthService {
    validator: SignatureValidator,
    issuer: TokenIssuer,
    registry: Arc<dyn DeviceRegistry>,
    anon_key: Option<String>,
}

impl DeviceAuthService {
    pub fn new(
        validator: SignatureValidator,
        issuer: TokenIssuer,
        registry: Arc<dyn DeviceRegistry>,
    ) -> Self {
        Self {
            validator,
            issuer,
            registry,
            anon_key: None,
        }
    }

    /// Public client key handed to devices alongside their token.
    pub fn with_anon_key(mut self, anon_key: Option<String>) -> Self {
        self.anon_key = anon_key.filter(|k| !k.is_empty());
        self
    }

    /// Trade a signed request for a device token.
    pub fn authenticate(&self, headers: &RequestHeaders, body: &[u8]) -> Result<AuthResponse> {
        let device = self.validator.validate_headers(headers, body)?;
        if let Err(e) = device.status.ensure_active() {
            tracing::warn!(serial = %device.serial_number, status = device.status.as_str(), "Device not allowed to authenticate");
            return Err(e.into());
        }

        let issued = self.issuer.issue_device_token(&device)?;
        tracing::info!(serial = %device.serial_number, device_id = %device.device_id, "Device authenticated");

        Ok(AuthResponse {
            success: true,
            error: None,
            expires_at: Some(issued.expires_at_rfc3339()),
            token: Some(issued.token),
            serial_number: Some(device.serial_number),
            device_id: Some(device.device_id),
            device_uuid: Some(device.device_uuid),
            user_uuid: device.user_uuid,
            pairing_code: device.pairing_code,
            target_firmware_version: device.target_firmware_version,
            debug_enabled: device.debug_enabled,
            anon_key: self.anon_key.clone(),
        })
    }

    /// Trade a signed request carrying the device's pairing code for an app
    /// token. The pairing code must belong to the signing device.
    pub fn exchange_app_token(
        &self,
        headers: &RequestHeaders,
        body: &[u8],
    ) -> Result<AuthResponse> {
        let device = self.validator.validate_headers(headers, body)?;
        device.status.ensure_active()?;

        let request: AppAuthRequest =
            serde_json::from_slice(body).map_err(|_| AuthError::NotPaired)?;
        let code = request.pairing_code.trim().to_ascii_uppercase();

        let paired = self
            .registry
            .find_by_pairing_code(&code)?
            .filter(|d| d.serial_number == device.serial_number)
            .ok_or_else(|| {
                tracing::warn!(serial = %device.serial_number, "Pairing code does not belong to device");
                AuthError::NotPaired
            })?;

        let issued = self.issuer.issue_app_token(&paired)?;
        Ok(AuthResponse {
            success: true,
            expires_at: Some(issued.expires_at_rfc3339()),
            token: Some(issued.token),
            serial_number: Some(paired.serial_number),
            device_id: Some(paired.device_id),
            pairing_code: paired.pairing_code,
            ..AuthResponse::default()
        })
    }
}
