//! Device credential manager.
//!
//! Owns the long-lived 32-byte device secret, its SHA-256 key hash (the value
//! the server stores and uses as HMAC key), and the public serial number
//! derived from the hardware identifier.
//!
//! ## Lifecycle
//! - `begin()` loads the secret from the [`SecretStore`] or generates and
//!   persists a new one; the serial is recomputed every time
//! - a failed save of a freshly generated secret is fatal: the buffer is
//!   zeroed and the store stays unprovisioned
//! - `reset()` is the only way back to unprovisioned and is refused while the
//!   hardware reports a locked state

use super::secret_store::{SecretStore, StoreError};
use crate::crypto::sha256_hex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

/// Device secret size (256 bits).
pub const DEVICE_SECRET_SIZE: usize = 32;

/// Serial number length (CRC32 as 8 hex chars).
pub const DEVICE_SERIAL_LENGTH: usize = 8;

/// Store namespace for device credentials.
pub const CREDENTIALS_NAMESPACE: &str = "device_auth";

/// Store key for the device secret.
pub const CREDENTIALS_KEY_SECRET: &str = "secret";

const DEVICE_ID_PREFIX: &str = "webex-display-";

/// Hardware-unique identity of the device.
pub trait HardwareIdentity: Send + Sync {
    /// 48-bit MAC as six bytes, least significant byte first.
    fn mac_bytes(&self) -> [u8; 6];

    /// Whether a hardware lock (e.g. burned eFuse) forbids credential reset.
    fn is_locked(&self) -> bool {
        false
    }
}

/// Fixed identity, for tests and emulated devices.
#[derive(Debug, Clone)]
pub struct StaticHardware {
    mac: [u8; 6],
    locked: bool,
}

impl StaticHardware {
    pub fn new(mac: [u8; 6]) -> Self {
        Self { mac, locked: false }
    }

    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }
}

impl HardwareIdentity for StaticHardware {
    fn mac_bytes(&self) -> [u8; 6] {
        self.mac
    }

    fn is_locked(&self) -> bool {
        self.locked
    }
}

/// Identity of the host machine (hostname + machine-id), for running the
/// device side on a workstation.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostHardware;

impl HostHardware {
    fn collect_fingerprint() -> String {
        let mut parts = Vec::new();

        if let Ok(hostname) = hostname::get() {
            parts.push(hostname.to_string_lossy().to_string());
        }

        // Machine ID (Linux)
        if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
            parts.push(machine_id.trim().to_string());
        }

        parts.push(format!(
            "{}:{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        ));

        parts.join("|")
    }
}

impl HardwareIdentity for HostHardware {
    fn mac_bytes(&self) -> [u8; 6] {
        let digest = Sha256::digest(Self::collect_fingerprint().as_bytes());
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&digest[..6]);
        mac
    }
}

/// Derive the 8-char uppercase serial from the MAC via CRC32.
pub fn serial_from_mac(mac: &[u8; 6]) -> String {
    format!("{:08X}", crc32fast::hash(mac))
}

/// Device id in the standard `webex-display-XXXX` form (last 4 serial chars).
pub fn device_id_for_serial(serial: &str) -> String {
    let suffix = serial.get(4..).unwrap_or(serial);
    format!("{DEVICE_ID_PREFIX}{suffix}")
}

/// Whether the device holds a usable secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Unprovisioned,
    Provisioned,
}

/// Credential lifecycle failure.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read device secret: {0}")]
    Load(#[source] StoreError),
    #[error("failed to persist device secret: {0}")]
    Persist(#[source] StoreError),
    #[error("credentials are hardware-locked and cannot be reset")]
    HardwareLocked,
}

/// Device-side credential store.
pub struct CredentialStore {
    store: Arc<dyn SecretStore>,
    hardware: Arc<dyn HardwareIdentity>,
    secret: Zeroizing<[u8; DEVICE_SECRET_SIZE]>,
    key_hash: Option<Zeroizing<String>>,
    serial: String,
    status: ProvisioningStatus,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn SecretStore>, hardware: Arc<dyn HardwareIdentity>) -> Self {
        Self {
            store,
            hardware,
            secret: Zeroizing::new([0u8; DEVICE_SECRET_SIZE]),
            key_hash: None,
            serial: String::new(),
            status: ProvisioningStatus::Unprovisioned,
        }
    }

    /// Load or generate credentials.
    pub fn begin(&mut self) -> Result<ProvisioningStatus, CredentialError> {
        tracing::info!("Initializing device credentials");

        self.serial = serial_from_mac(&self.hardware.mac_bytes());
        tracing::info!(serial = %self.serial, "Device serial computed");

        if self.load_secret()? {
            self.compute_key_hash();
            self.status = ProvisioningStatus::Provisioned;
            tracing::info!(serial = %self.serial, "Loaded existing device secret");
            return Ok(self.status);
        }

        tracing::info!("Generating new device secret");
        self.generate_secret();

        if let Err(e) = self
            .store
            .put(CREDENTIALS_NAMESPACE, CREDENTIALS_KEY_SECRET, self.secret.as_slice())
        {
            tracing::error!(error = %e, "Failed to save device secret");
            self.clear_secret();
            self.status = ProvisioningStatus::Unprovisioned;
            return Err(CredentialError::Persist(e));
        }

        self.compute_key_hash();
        self.status = ProvisioningStatus::Provisioned;
        tracing::info!(
            key_hash_prefix = %self.key_hash_prefix(),
            "New device secret generated and saved"
        );
        Ok(self.status)
    }

    /// Wipe persisted and in-memory credentials.
    pub fn reset(&mut self) -> Result<(), CredentialError> {
        if self.hardware.is_locked() {
            tracing::warn!(serial = %self.serial, "Credential reset refused: hardware-locked");
            return Err(CredentialError::HardwareLocked);
        }

        self.store
            .clear(CREDENTIALS_NAMESPACE)
            .map_err(CredentialError::Persist)?;

        self.clear_secret();
        self.status = ProvisioningStatus::Unprovisioned;
        tracing::info!("Credentials reset, will regenerate on next begin");
        Ok(())
    }

    pub fn status(&self) -> ProvisioningStatus {
        self.status
    }

    pub fn is_provisioned(&self) -> bool {
        self.status == ProvisioningStatus::Provisioned
    }

    pub fn serial_number(&self) -> &str {
        &self.serial
    }

    /// Lowercase hex SHA-256 of the secret, `None` until provisioned.
    pub fn key_hash(&self) -> Option<&str> {
        self.key_hash.as_ref().map(|h| h.as_str())
    }

    pub fn device_id(&self) -> String {
        device_id_for_serial(&self.serial)
    }

    fn load_secret(&mut self) -> Result<bool, CredentialError> {
        let stored = self
            .store
            .get(CREDENTIALS_NAMESPACE, CREDENTIALS_KEY_SECRET)
            .map_err(CredentialError::Load)?;

        match stored {
            Some(bytes) if bytes.len() == DEVICE_SECRET_SIZE => {
                self.secret.copy_from_slice(&bytes);
                Ok(true)
            }
            Some(bytes) => {
                tracing::warn!(len = bytes.len(), "Stored device secret has wrong length, ignoring");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn generate_secret(&mut self) {
        let mut fresh: [u8; DEVICE_SECRET_SIZE] = rand::random();
        self.secret.copy_from_slice(&fresh);
        fresh.zeroize();
    }

    fn compute_key_hash(&mut self) {
        self.key_hash = Some(Zeroizing::new(sha256_hex(self.secret.as_slice())));
    }

    fn clear_secret(&mut self) {
        self.secret.zeroize();
        // Dropping the Zeroizing<String> wipes it
        self.key_hash = None;
    }

    fn key_hash_prefix(&self) -> String {
        self.key_hash()
            .map(|h| format!("{}...", &h[..16]))
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn secret_bytes(&self) -> &[u8] {
        self.secret.as_slice()
    }
}
