//! Per-user record of the last remote version this device has seen.

use crate::kv::KeyValueStore;
use crate::{error::Result, Error, Timestamp, Version};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What this device last knew about the remote document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMeta {
    /// Never decreases on this device
    pub last_remote_version: Version,
    pub last_remote_updated_at: Option<Timestamp>,
}

impl SyncMeta {
    /// Move forward to `version`. Older versions leave the version alone.
    pub fn advance(&mut self, version: Version, updated_at: Timestamp) {
        if version >= self.last_remote_version {
            self.last_remote_version = version;
            self.last_remote_updated_at = Some(updated_at);
        }
    }

    /// Remember a remote timestamp without a version. Never moves backwards.
    pub fn observe(&mut self, updated_at: Timestamp) {
        if self.last_remote_updated_at.map_or(true, |seen| updated_at > seen) {
            self.last_remote_updated_at = Some(updated_at);
        }
    }
}

/// Loads and persists [`SyncMeta`] per user.
///
/// Updates are read-modify-write under one lock shared by all clones.
#[derive(Debug, Clone)]
pub struct MetaStore {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl MetaStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn key(user_id: &str) -> String {
        format!("sync_meta:{}", user_id)
    }

    /// Current meta, or the zero value for a user never synced here.
    pub fn load(&self, user_id: &str) -> Result<SyncMeta> {
        match self.kv.get(&Self::key(user_id))? {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| Error::Storage(format!("corrupt sync meta: {}", e))),
            None => Ok(SyncMeta::default()),
        }
    }

    /// Advance and persist. Returns the stored value.
    pub fn advance(
        &self,
        user_id: &str,
        version: Version,
        updated_at: Timestamp,
    ) -> Result<SyncMeta> {
        self.update(user_id, |meta| meta.advance(version, updated_at))
    }

    /// Record the timestamp of an unversioned remote document.
    pub fn observe_timestamp(&self, user_id: &str, updated_at: Timestamp) -> Result<SyncMeta> {
        self.update(user_id, |meta| meta.observe(updated_at))
    }

    fn update(&self, user_id: &str, apply: impl FnOnce(&mut SyncMeta)) -> Result<SyncMeta> {
        let _guard = self.write_lock.lock();
        let mut meta = self.load(user_id)?;
        apply(&mut meta);
        let raw = serde_json::to_string(&meta).map_err(|e| Error::Storage(e.to_string()))?;
        self.kv.set(&Self::key(user_id), &raw)?;
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use chrono::{TimeZone, Utc};

    #[test]
    fn advance_is_monotonic() {
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        let mut meta = SyncMeta::default();
        meta.advance(3, t1);
        meta.advance(2, t2);
        assert_eq!(meta.last_remote_version, 3);
        assert_eq!(meta.last_remote_updated_at, Some(t1));

        meta.advance(4, t2);
        assert_eq!(meta.last_remote_version, 4);
    }

    #[test]
    fn persisted_per_user() {
        let store = MetaStore::new(Arc::new(MemoryStore::new()));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(store.load("u1").unwrap(), SyncMeta::default());
        store.advance("u1", 2, now).unwrap();

        assert_eq!(store.load("u1").unwrap().last_remote_version, 2);
        assert_eq!(store.load("u2").unwrap().last_remote_version, 0);
    }

    #[test]
    fn observe_keeps_version_and_latest_timestamp() {
        let store = MetaStore::new(Arc::new(MemoryStore::new()));
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();

        store.advance("u1", 1, t1).unwrap();
        let meta = store.observe_timestamp("u1", t2).unwrap();
        assert_eq!(meta.last_remote_version, 1);
        assert_eq!(meta.last_remote_updated_at, Some(t2));

        let meta = store.observe_timestamp("u1", t1).unwrap();
        assert_eq!(meta.last_remote_updated_at, Some(t2));
    }

    #[test]
    fn concurrent_advances_keep_the_highest_version() {
        let store = MetaStore::new(Arc::new(MemoryStore::new()));
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let handles: Vec<_> = (1..=8u64)
            .map(|worker| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for round in 0..50u64 {
                        store.advance("u1", round * 8 + worker, now).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.load("u1").unwrap().last_remote_version, 49 * 8 + 8);
    }
}
