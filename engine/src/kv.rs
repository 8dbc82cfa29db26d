//! Durable key/value persistence.
//!
//! The engine writes whole collections as single values, so a store only
//! needs atomic `set` per key for a failed write to leave the previous value
//! intact.

use crate::{error::Result, Error};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `ENOSPC` on Linux and macOS.
const NO_SPACE_OS_ERROR: i32 = 28;

/// Local key/value collaborator.
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    /// Read a value.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that rejects writes past `quota_bytes` of values.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Number of keys held.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no keys are held.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total bytes of all values.
    pub fn used_bytes(&self) -> usize {
        self.entries.read().values().map(String::len).sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.write();
        if let Some(quota) = self.quota_bytes {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if others + value.len() > quota {
                return Err(Error::StorageQuotaExceeded(format!(
                    "writing {} bytes to '{}' exceeds quota of {} bytes",
                    value.len(),
                    key,
                    quota
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// File-backed store: one JSON file per key under a root directory.
///
/// Writes go to a temp file that is then renamed over the target.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(storage_error)?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        if let Err(e) = fs::write(&tmp, value) {
            let _ = fs::remove_file(&tmp);
            return Err(storage_error(e));
        }
        fs::rename(&tmp, &path).map_err(storage_error)
    }

    fn remove(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error(e)),
        }
    }
}

/// Map keys to unique, filesystem-safe names.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

fn storage_error(err: io::Error) -> Error {
    if err.raw_os_error() == Some(NO_SPACE_OS_ERROR) {
        Error::StorageQuotaExceeded(err.to_string())
    } else {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "v1").unwrap();
        store.set("k", "v2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v2"));
        assert_eq!(store.len(), 1);

        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn memory_quota_keeps_previous_value() {
        let store = MemoryStore::with_quota(10);
        store.set("k", "12345").unwrap();

        let result = store.set("k", "this is far too long");
        assert!(matches!(result, Err(Error::StorageQuotaExceeded(_))));
        assert_eq!(store.get("k").unwrap().as_deref(), Some("12345"));

        // Replacing a value only counts the new size
        store.set("k", "0123456789").unwrap();
        assert_eq!(store.used_bytes(), 10);
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("data")).unwrap();

        store.set("restore_points:user-1", "[1]").unwrap();
        assert_eq!(
            store.get("restore_points:user-1").unwrap().as_deref(),
            Some("[1]")
        );
        assert_eq!(store.get("restore_points").unwrap(), None);

        store.remove("restore_points:user-1").unwrap();
        assert_eq!(store.get("restore_points:user-1").unwrap(), None);
        store.remove("restore_points:user-1").unwrap();
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        FileStore::open(dir.path()).unwrap().set("meta", "{}").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("meta").unwrap().as_deref(), Some("{}"));
    }

    #[test]
    fn key_encoding_is_unique() {
        assert_eq!(encode_key("audit_log:dev-1"), "audit_log%3Adev-1");
        assert_ne!(encode_key("a:b"), encode_key("a_b"));
        assert_ne!(encode_key("a%3Ab"), encode_key("a:b"));
    }
}
