//! Device registry: the server's record of each device's key hash, identity
//! keys and replay floor.
//!
//! `advance_replay_floor` is the one place where concurrency matters. Both
//! backends implement it as a single conditional update guarded by
//! `timestamp > replay_floor`, so two requests carrying the same timestamp
//! can never both win.
//!
//! Tables (SQLite backend):
//! - `devices`: serial_number, key_hash, device_uuid, pairing_code, device_id,
//!   user_uuid, replay_floor, debug_enabled, status, target_firmware_version

use crate::device::credentials::device_id_for_serial;
use crate::error::{AuthError, TransientError};
use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Administrative state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Active,
    PendingApproval,
    Disabled,
    Blacklisted,
    Deleted,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::PendingApproval => "pending_approval",
            Self::Disabled => "disabled",
            Self::Blacklisted => "blacklisted",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "pending_approval" => Some(Self::PendingApproval),
            "disabled" => Some(Self::Disabled),
            "blacklisted" => Some(Self::Blacklisted),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }

    /// Reject devices that may not obtain tokens.
    pub fn ensure_active(&self) -> Result<(), AuthError> {
        match self {
            Self::Active => Ok(()),
            Self::PendingApproval => Err(AuthError::ApprovalRequired),
            Self::Disabled => Err(AuthError::DeviceDisabled),
            Self::Blacklisted => Err(AuthError::DeviceBlacklisted),
            Self::Deleted => Err(AuthError::DeviceDeleted),
        }
    }
}

/// A registered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub serial_number: String,
    /// Lowercase hex SHA-256 of the device secret; the HMAC key.
    pub key_hash: String,
    /// Canonical identity key.
    pub device_uuid: String,
    /// Legacy secondary identity key.
    pub pairing_code: Option<String>,
    pub device_id: String,
    pub user_uuid: Option<String>,
    /// Highest timestamp ever accepted for this device.
    pub replay_floor: u64,
    pub debug_enabled: bool,
    pub status: DeviceStatus,
    pub target_firmware_version: Option<String>,
}

impl DeviceRecord {
    /// A fresh, active record with a new device UUID.
    pub fn new(serial_number: &str, key_hash: &str) -> Self {
        Self {
            serial_number: serial_number.to_string(),
            key_hash: key_hash.to_ascii_lowercase(),
            device_uuid: uuid::Uuid::new_v4().to_string(),
            pairing_code: None,
            device_id: device_id_for_serial(serial_number),
            user_uuid: None,
            replay_floor: 0,
            debug_enabled: false,
            status: DeviceStatus::Active,
            target_firmware_version: None,
        }
    }

    pub fn with_pairing_code(mut self, code: &str) -> Self {
        self.pairing_code = Some(code.to_string());
        self
    }

    pub fn with_status(mut self, status: DeviceStatus) -> Self {
        self.status = status;
        self
    }
}

/// Registry lookups used by the validators.
pub trait DeviceRegistry: Send + Sync {
    fn find_by_serial(&self, serial: &str) -> Result<Option<DeviceRecord>, TransientError>;

    fn find_by_pairing_code(&self, code: &str) -> Result<Option<DeviceRecord>, TransientError>;

    /// Set the floor to `timestamp` iff `timestamp` is strictly greater than
    /// the current floor. Returns whether the floor moved.
    fn advance_replay_floor(&self, serial: &str, timestamp: u64) -> Result<bool, TransientError>;
}

// ── In-memory backend ───────────────────────────────────────────────

/// Thread-safe in-memory registry.
#[derive(Default)]
pub struct MemoryDeviceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
}

impl MemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: DeviceRecord) {
        self.devices
            .lock()
            .insert(record.serial_number.clone(), record);
    }

    pub fn set_status(&self, serial: &str, status: DeviceStatus) -> bool {
        match self.devices.lock().get_mut(serial) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }
}

impl DeviceRegistry for MemoryDeviceRegistry {
    fn find_by_serial(&self, serial: &str) -> Result<Option<DeviceRecord>, TransientError> {
        Ok(self.devices.lock().get(serial).cloned())
    }

    fn find_by_pairing_code(&self, code: &str) -> Result<Option<DeviceRecord>, TransientError> {
        Ok(self
            .devices
            .lock()
            .values()
            .find(|d| d.pairing_code.as_deref() == Some(code))
            .cloned())
    }

    fn advance_replay_floor(&self, serial: &str, timestamp: u64) -> Result<bool, TransientError> {
        let mut devices = self.devices.lock();
        match devices.get_mut(serial) {
            Some(record) if timestamp > record.replay_floor => {
                record.replay_floor = timestamp;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ── SQLite backend ──────────────────────────────────────────────────

/// SQLite-backed registry.
pub struct SqliteDeviceRegistry {
    conn: Mutex<rusqlite::Connection>,
}

const DEVICE_COLUMNS: &str = "serial_number, key_hash, device_uuid, pairing_code, device_id, \
     user_uuid, replay_floor, debug_enabled, status, target_firmware_version";

impl SqliteDeviceRegistry {
    /// Open (or create) the registry database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;

        // WAL mode for concurrent reads + crash safety
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::init_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        Self::init_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &rusqlite::Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS devices (
                serial_number TEXT PRIMARY KEY,
                key_hash TEXT NOT NULL,
                device_uuid TEXT NOT NULL UNIQUE,
                pairing_code TEXT,
                device_id TEXT NOT NULL,
                user_uuid TEXT,
                replay_floor INTEGER NOT NULL DEFAULT 0,
                debug_enabled INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active',
                target_firmware_version TEXT,
                created_at INTEGER NOT NULL,
                last_auth_at INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_devices_pairing_code ON devices(pairing_code);",
        )?;
        Ok(())
    }

    /// Insert or update a device. The replay floor of an existing row is kept.
    pub fn upsert(&self, record: &DeviceRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO devices (serial_number, key_hash, device_uuid, pairing_code, device_id,
                                  user_uuid, replay_floor, debug_enabled, status,
                                  target_firmware_version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(serial_number) DO UPDATE SET
                key_hash = excluded.key_hash,
                pairing_code = excluded.pairing_code,
                user_uuid = excluded.user_uuid,
                debug_enabled = excluded.debug_enabled,
                status = excluded.status,
                target_firmware_version = excluded.target_firmware_version",
            rusqlite::params![
                record.serial_number,
                record.key_hash,
                record.device_uuid,
                record.pairing_code,
                record.device_id,
                record.user_uuid,
                record.replay_floor as i64,
                record.debug_enabled,
                record.status.as_str(),
                record.target_firmware_version,
                epoch_secs() as i64,
            ],
        )?;
        tracing::info!(serial = %record.serial_number, "Device registered");
        Ok(())
    }

    pub fn set_status(&self, serial: &str, status: DeviceStatus) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE devices SET status = ?1 WHERE serial_number = ?2",
            rusqlite::params![status.as_str(), serial],
        )?;
        Ok(updated > 0)
    }

    fn query_one(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<DeviceRecord>, TransientError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE {clause} = ?1 LIMIT 1");
        let row = conn.query_row(&sql, rusqlite::params![value], row_to_record);

        match row {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(TransientError::Registry(e.to_string())),
        }
    }
}

impl DeviceRegistry for SqliteDeviceRegistry {
    fn find_by_serial(&self, serial: &str) -> Result<Option<DeviceRecord>, TransientError> {
        self.query_one("serial_number", serial)
    }

    fn find_by_pairing_code(&self, code: &str) -> Result<Option<DeviceRecord>, TransientError> {
        self.query_one("pairing_code", code)
    }

    fn advance_replay_floor(&self, serial: &str, timestamp: u64) -> Result<bool, TransientError> {
        let conn = self.conn.lock();
        let updated = conn
            .execute(
                "UPDATE devices SET replay_floor = ?2, last_auth_at = ?3
                 WHERE serial_number = ?1 AND replay_floor < ?2",
                rusqlite::params![serial, timestamp as i64, epoch_secs() as i64],
            )
            .map_err(|e| TransientError::Registry(e.to_string()))?;
        Ok(updated == 1)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeviceRecord> {
    let status: String = row.get(8)?;
    let replay_floor: i64 = row.get(6)?;
    Ok(DeviceRecord {
        serial_number: row.get(0)?,
        key_hash: row.get(1)?,
        device_uuid: row.get(2)?,
        pairing_code: row.get(3)?,
        device_id: row.get(4)?,
        user_uuid: row.get(5)?,
        replay_floor: u64::try_from(replay_floor).unwrap_or(0),
        debug_enabled: row.get(7)?,
        // Unknown states fail closed
        status: DeviceStatus::parse(&status).unwrap_or(DeviceStatus::Disabled),
        target_firmware_version: row.get(9)?,
    })
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
