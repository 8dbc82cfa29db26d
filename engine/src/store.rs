//! Scoped, retained collections over a [`KeyValueStore`].
//!
//! Each collection is stored per scope (a user id, or the device id when
//! nobody is signed in) as one JSON array, newest first. Every mutation is a
//! read-modify-write of the whole array under a per-scope lock, so concurrent
//! writers to one scope are serialized and a failed write leaves the previous
//! array untouched.
//!
//! Older builds kept a single unscoped array under the bare collection name.
//! The first read of any scope moves that legacy array into the scope and
//! deletes the legacy key.

use crate::kv::KeyValueStore;
use crate::record::ScopedRecord;
use crate::{error::Result, Error};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;

/// A retained collection of `R`, partitioned by scope.
#[derive(Debug)]
pub struct ScopedStore<R> {
    kv: Arc<dyn KeyValueStore>,
    retention: usize,
    locks: DashMap<String, Arc<Mutex<()>>>,
    migration: Mutex<()>,
    _marker: PhantomData<fn() -> R>,
}

impl<R: ScopedRecord> ScopedStore<R> {
    /// Create a store keeping at most `retention` records per scope.
    pub fn new(kv: Arc<dyn KeyValueStore>, retention: usize) -> Self {
        Self {
            kv,
            retention: retention.max(1),
            locks: DashMap::new(),
            migration: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// Retention limit per scope.
    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Prepend `record`, evicting the oldest past the retention limit.
    pub fn create(&self, scope: &str, record: R) -> Result<R> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        let mut records = self.load(scope)?;
        records.insert(0, record.clone());
        if records.len() > self.retention {
            let evicted = records.len() - self.retention;
            records.truncate(self.retention);
            tracing::debug!(
                collection = R::COLLECTION,
                scope = %scope,
                evicted,
                "Evicted records past retention"
            );
        }
        self.persist(scope, &records)?;
        Ok(record)
    }

    /// Up to `limit` records, newest first.
    pub fn list(&self, scope: &str, limit: usize) -> Result<Vec<R>> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        let mut records = self.load(scope)?;
        records.truncate(limit);
        Ok(records)
    }

    /// Look up a record by id.
    pub fn get(&self, scope: &str, id: &str) -> Result<Option<R>> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        Ok(self.load(scope)?.into_iter().find(|r| r.id() == id))
    }

    /// Remove a record. Returns whether anything was removed.
    pub fn delete(&self, scope: &str, id: &str) -> Result<bool> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        let mut records = self.load(scope)?;
        let before = records.len();
        records.retain(|r| r.id() != id);
        if records.len() == before {
            return Ok(false);
        }
        self.persist(scope, &records)?;
        Ok(true)
    }

    /// Drop every record in a scope.
    pub fn clear(&self, scope: &str) -> Result<()> {
        let lock = self.scope_lock(scope);
        let _guard = lock.lock();

        self.kv.remove(&Self::scoped_key(scope))
    }

    fn scoped_key(scope: &str) -> String {
        format!("{}:{}", R::COLLECTION, scope)
    }

    fn scope_lock(&self, scope: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a scope, migrating legacy data first. Caller holds the scope lock.
    fn load(&self, scope: &str) -> Result<Vec<R>> {
        let key = Self::scoped_key(scope);
        if let Some(raw) = self.kv.get(&key)? {
            return Self::decode(&key, &raw);
        }
        self.migrate_legacy(scope, &key)
    }

    fn migrate_legacy(&self, scope: &str, key: &str) -> Result<Vec<R>> {
        let _guard = self.migration.lock();

        let Some(raw) = self.kv.get(R::COLLECTION)? else {
            return Ok(Vec::new());
        };
        let records = Self::decode(R::COLLECTION, &raw)?;
        self.kv.set(key, &raw)?;
        self.kv.remove(R::COLLECTION)?;
        tracing::info!(
            collection = R::COLLECTION,
            scope = %scope,
            count = records.len(),
            "Migrated legacy collection into scope"
        );
        Ok(records)
    }

    fn persist(&self, scope: &str, records: &[R]) -> Result<()> {
        let raw = serde_json::to_string(records).map_err(|e| Error::Storage(e.to_string()))?;
        self.kv.set(&Self::scoped_key(scope), &raw)
    }

    fn decode(key: &str, raw: &str) -> Result<Vec<R>> {
        serde_json::from_str(raw)
            .map_err(|e| Error::Storage(format!("corrupt collection '{}': {}", key, e)))
    }
}
