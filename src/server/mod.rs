//! Server side of the protocol: signature validation against the device
//! registry, token issuance and token verification.

pub mod app_token;
pub mod issuer;
pub mod key_source;
pub mod keys;
pub mod registry;
pub mod service;
pub mod token;
pub mod validator;
pub mod verifier;

pub use app_token::{AppAuthMode, AppPrincipal, AppTokenValidator};
pub use issuer::{IssuedToken, TokenIssuer, TokenPolicy};
pub use key_source::RemoteKeySource;
pub use keys::{Algorithm, Jwk, SigningKey};
pub use registry::{
    DeviceRecord, DeviceRegistry, DeviceStatus, MemoryDeviceRegistry, SqliteDeviceRegistry,
};
pub use service::DeviceAuthService;
pub use token::{AppClaims, DeviceClaims, IdentityKey, TypedClaims};
pub use validator::{AuthMode, SignatureValidator};
pub use verifier::{bearer_token, TokenVerifier};
