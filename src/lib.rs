#![forbid(unsafe_code)]
#![warn(clippy::all)]

//! Device identity and request authentication for networked status displays.
//!
//! The device provisions a 32-byte secret, signs each request with
//! HMAC-SHA256 over `serial:timestamp:sha256(body)`, and trades a signed
//! request for a short-lived bearer token. The server validates signatures
//! against the registry with a monotonic per-device replay floor, and issues
//! and verifies device and companion-app tokens.

pub mod clock;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod server;

pub use error::{AuthError, ConfigError, Error, Result, TransientError};
