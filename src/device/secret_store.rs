//! Persistent byte store for device-local secrets.
//!
//! Modeled as a capability (`get`/`put`/`clear` over namespace + key) so the
//! credential logic never depends on a particular storage backend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Storage backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("secret store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// Namespaced byte store.
pub trait SecretStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key is absent.
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError>;

    /// Write a value, replacing any previous one.
    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove every key in the namespace.
    fn clear(&self, namespace: &str) -> Result<(), StoreError>;
}

/// In-memory store for tests and emulated devices.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<(String, String), Zeroizing<Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        let entries = self.entries.lock();
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(
            (namespace.to_string(), key.to_string()),
            Zeroizing::new(value.to_vec()),
        );
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        // Dropped Zeroizing values wipe themselves
        self.entries.lock().retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}

/// File-backed store: one directory per namespace, one 0600 file per key.
pub struct FileSecretStore {
    root: PathBuf,
}

impl FileSecretStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn key_path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root.join(namespace).join(key)
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<Zeroizing<Vec<u8>>>, StoreError> {
        let path = self.key_path(namespace, key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Zeroizing::new(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, namespace: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let dir = self.root.join(namespace);
        fs::create_dir_all(&dir)?;

        // Written to a 0600 sibling, then renamed over the target, so the
        // key never exists short or with wider permissions
        let path = dir.join(key);
        let tmp = dir.join(format!(".{key}.tmp"));
        match fs::remove_file(&tmp) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }

        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&tmp)?;
        if let Err(e) = file.write_all(value).and_then(|()| file.sync_all()) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        drop(file);
        fs::rename(&tmp, &path)?;

        #[cfg(unix)]
        if let Ok(dir_handle) = fs::File::open(&dir) {
            let _ = dir_handle.sync_all();
        }

        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        let dir = self.root.join(namespace);
        if !dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_file() {
                // Overwrite before unlinking so the bytes do not linger on disk
                if let Ok(meta) = fs::metadata(&path) {
                    let zeros = vec![0u8; meta.len() as usize];
                    let _ = fs::write(&path, zeros);
                }
                fs::remove_file(&path)?;
            }
        }
        fs::remove_dir(&dir)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn memory_store_roundtrip_and_clear() {
        let store = MemorySecretStore::new();
        store.put("ns", "a", b"one").unwrap();
        store.put("other", "a", b"two").unwrap();

        assert_eq!(store.get("ns", "a").unwrap().unwrap().as_slice(), b"one");
        store.clear("ns").unwrap();
        assert!(store.get("ns", "a").unwrap().is_none());
        assert_eq!(store.get("other", "a").unwrap().unwrap().as_slice(), b"two");
    }

    #[test]
    fn file_store_missing_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::new(tmp.path());
        assert!(store.get("device_auth", "secret").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        FileSecretStore::new(tmp.path())
            .put("device_auth", "secret", &[7u8; 32])
            .unwrap();

        let reopened = FileSecretStore::new(tmp.path());
        let value = reopened.get("device_auth", "secret").unwrap().unwrap();
        assert_eq!(value.as_slice(), &[7u8; 32]);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_uses_owner_only_permissions() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::new(tmp.path());
        store.put("device_auth", "secret", b"x").unwrap();

        let mode = fs::metadata(tmp.path().join("device_auth").join("secret"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn file_store_replaces_world_readable_file_atomically() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("device_auth");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("secret");
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        // Leftover from an interrupted write
        fs::write(dir.join(".secret.tmp"), b"partial").unwrap();

        let store = FileSecretStore::new(tmp.path());
        store.put("device_auth", "secret", &[9u8; 32]).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(fs::read(&path).unwrap(), vec![9u8; 32]);
        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("secret")]);
    }

    #[test]
    fn file_store_clear_removes_namespace() {
        let tmp = TempDir::new().unwrap();
        let store = FileSecretStore::new(tmp.path());
        store.put("device_auth", "secret", b"x").unwrap();
        store.clear("device_auth").unwrap();

        assert!(!tmp.path().join("device_auth").exists());
        assert!(store.get("device_auth", "secret").unwrap().is_none());
        // Clearing twice is fine
        store.clear("device_auth").unwrap();
    }
}
