//! Wire-level pieces shared by the device and server runtimes.

use serde::{Deserialize, Serialize};

/// Header carrying the 8-char device serial.
pub const HEADER_SERIAL: &str = "X-Device-Serial";
/// Header carrying the decimal unix timestamp.
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";
/// Header carrying the base64 HMAC signature.
pub const HEADER_SIGNATURE: &str = "X-Signature";

/// Maximum allowed clock skew between device and server (seconds).
pub const TIMESTAMP_WINDOW_SECS: u64 = 300;

/// `token_type` claim of device tokens.
pub const DEVICE_TOKEN_TYPE: &str = "device";
/// `type` claim of companion-app tokens.
pub const APP_TOKEN_TYPE: &str = "app_auth";

/// A request signed by the device, ready to be attached as headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    pub serial: String,
    pub timestamp: u64,
    pub body_hash: String,
    pub signature: String,
}

impl SignedRequest {
    /// The three authentication headers, in wire form.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_SERIAL, self.serial.clone()),
            (HEADER_TIMESTAMP, self.timestamp.to_string()),
            (HEADER_SIGNATURE, self.signature.clone()),
        ]
    }
}

/// Raw authentication headers as received by the server.
#[derive(Debug, Clone, Default)]
pub struct RequestHeaders {
    pub serial: Option<String>,
    pub timestamp: Option<String>,
    pub signature: Option<String>,
}

impl RequestHeaders {
    /// Collect the headers from any case-insensitive lookup.
    pub fn from_lookup<'a>(lookup: impl Fn(&str) -> Option<&'a str>) -> Self {
        Self {
            serial: lookup(HEADER_SERIAL).map(str::to_string),
            timestamp: lookup(HEADER_TIMESTAMP).map(str::to_string),
            signature: lookup(HEADER_SIGNATURE).map(str::to_string),
        }
    }
}

/// JSON body returned by the device-auth exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// RFC 3339, e.g. `2026-01-28T13:00:00Z`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_firmware_version: Option<String>,
    #[serde(default)]
    pub debug_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anon_key: Option<String>,
}

impl AuthResponse {
    /// Failure body carrying the stable error code.
    pub fn failure(code: &str) -> Self {
        Self {
            success: false,
            error: Some(code.to_string()),
            ..Self::default()
        }
    }
}
