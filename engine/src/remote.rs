//! Remote document store collaborator.
//!
//! The engine needs nothing more than a versioned document store holding one
//! state document per user plus a conflict collection. Backends are injected
//! at construction: [`LocalOnly`] when no cloud backend is configured, or any
//! [`RemoteDocumentStore`] implementation talking to a real service.
//! [`MemoryDocumentStore`] is an in-process implementation for tests and
//! single-process setups.

use crate::conflict::{Conflict, Resolution};
use crate::{DeviceId, Timestamp, UserId, Version};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// The per-user state document held by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub state_json: String,
    pub checksum: String,
    pub updated_at: Timestamp,
    /// Absent on documents written before versioning existed
    #[serde(default)]
    pub version: Option<Version>,
}

/// Partial update applied to a stored conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictPatch {
    pub resolved_at: Option<Timestamp>,
    pub resolution: Option<Resolution>,
}

/// What a backend can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Whether documents can be read and written remotely at all
    pub remote_sync: bool,
}

/// Errors reported by a remote backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("remote is unreachable")]
    Offline,

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: Version, actual: Version },

    #[error("no remote backend configured")]
    NotConfigured,

    #[error("{0}")]
    Other(String),
}

/// Versioned read/write of one user-state document and a conflict collection.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// Capabilities checked before any I/O.
    fn capabilities(&self) -> Capabilities {
        Capabilities { remote_sync: true }
    }

    /// Fetch the user's document, if any.
    async fn get_document(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError>;

    /// Write the user's document.
    ///
    /// Stores that can check versions atomically should reject a document
    /// whose version is not exactly one past the stored one with
    /// [`RemoteError::VersionConflict`].
    async fn put_document(&self, user_id: &str, doc: RemoteDocument) -> Result<(), RemoteError>;

    /// Store a newly detected conflict.
    async fn record_conflict(&self, conflict: &Conflict) -> Result<(), RemoteError>;

    /// All conflicts stored for a user, resolved or not.
    async fn query_conflicts(&self, user_id: &str) -> Result<Vec<Conflict>, RemoteError>;

    /// Apply a patch to a stored conflict.
    async fn update_conflict(&self, conflict_id: &str, patch: ConflictPatch)
        -> Result<(), RemoteError>;
}

/// Backend used when no cloud store is configured. Every call fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnly;

#[async_trait]
impl RemoteDocumentStore for LocalOnly {
    fn capabilities(&self) -> Capabilities {
        Capabilities { remote_sync: false }
    }

    async fn get_document(&self, _user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn put_document(&self, _user_id: &str, _doc: RemoteDocument) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn record_conflict(&self, _conflict: &Conflict) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn query_conflicts(&self, _user_id: &str) -> Result<Vec<Conflict>, RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn update_conflict(
        &self,
        _conflict_id: &str,
        _patch: ConflictPatch,
    ) -> Result<(), RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}

/// In-process document store with atomic version checks.
///
/// Counts every call and can be told to fail upcoming calls, which makes it
/// the reference backend for exercising the engine.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<UserId, RemoteDocument>,
    conflicts: DashMap<String, Conflict>,
    calls: AtomicUsize,
    failures: Mutex<VecDeque<RemoteError>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with `err`. Queued failures are used in order.
    pub fn fail_next(&self, err: RemoteError) {
        self.failures.lock().push_back(err);
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Current document for `user_id`.
    pub fn document(&self, user_id: &str) -> Option<RemoteDocument> {
        self.documents.get(user_id).map(|d| d.clone())
    }

    /// Overwrite a document without version checks.
    pub fn insert_document(&self, doc: RemoteDocument) {
        self.documents.insert(doc.user_id.clone(), doc);
    }

    /// Stored conflict by id.
    pub fn conflict(&self, conflict_id: &str) -> Option<Conflict> {
        self.conflicts.get(conflict_id).map(|c| c.clone())
    }

    fn enter(&self) -> Result<(), RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryDocumentStore {
    async fn get_document(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        self.enter()?;
        Ok(self.document(user_id))
    }

    async fn put_document(&self, user_id: &str, doc: RemoteDocument) -> Result<(), RemoteError> {
        self.enter()?;
        let actual = doc.version.unwrap_or(0);
        let next_version = move |current: Option<Version>| -> Result<(), RemoteError> {
            let expected = current.unwrap_or(0) + 1;
            if actual == expected {
                Ok(())
            } else {
                Err(RemoteError::VersionConflict { expected, actual })
            }
        };
        match self.documents.entry(user_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                next_version(occupied.get().version)?;
                occupied.insert(doc);
            }
            Entry::Vacant(vacant) => {
                next_version(None)?;
                vacant.insert(doc);
            }
        }
        Ok(())
    }

    async fn record_conflict(&self, conflict: &Conflict) -> Result<(), RemoteError> {
        self.enter()?;
        self.conflicts.insert(conflict.id.clone(), conflict.clone());
        Ok(())
    }

    async fn query_conflicts(&self, user_id: &str) -> Result<Vec<Conflict>, RemoteError> {
        self.enter()?;
        let mut conflicts: Vec<Conflict> = self
            .conflicts
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.clone())
            .collect();
        conflicts.sort_by(|a, b| a.detected_at.cmp(&b.detected_at));
        Ok(conflicts)
    }

    async fn update_conflict(
        &self,
        conflict_id: &str,
        patch: ConflictPatch,
    ) -> Result<(), RemoteError> {
        self.enter()?;
        let mut conflict = self
            .conflicts
            .get_mut(conflict_id)
            .ok_or_else(|| RemoteError::NotFound(format!("conflict {}", conflict_id)))?;
        if patch.resolved_at.is_some() {
            conflict.resolved_at = patch.resolved_at;
        }
        if patch.resolution.is_some() {
            conflict.resolution = patch.resolution;
        }
        Ok(())
    }
}
