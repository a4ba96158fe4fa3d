//! Device side of the protocol: credential provisioning, request signing and
//! the resulting bearer session.

pub mod credentials;
pub mod secret_store;
pub mod session;
pub mod signer;

pub use credentials::{
    CredentialError, CredentialStore, HardwareIdentity, HostHardware, ProvisioningStatus,
    StaticHardware,
};
pub use secret_store::{FileSecretStore, MemorySecretStore, SecretStore, StoreError};
pub use session::{AuthFailure, DeviceSession};
pub use signer::{RequestSigner, SignError};
