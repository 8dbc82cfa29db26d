//! The sync engine state machine.
//!
//! ```text
//!            sync()                 put ok
//!   Idle ───────────► Syncing ───────────────► Idle
//!    ▲                  │  │ remote moved ahead
//!    │   resolve all    │  └──────────────────► Conflict
//!    └──────────────────┼─────────────────────────┘
//!                       │ network / offline
//!                       ├─────────────────────► Offline
//!                       │ permission / other
//!                       └─────────────────────► Error
//! ```
//!
//! One `sync` runs at a time. The `Syncing` status doubles as the mutual
//! exclusion flag and is checked and set under the same lock, so two
//! overlapping calls can never both observe `Idle`. The lock is never held
//! across an `.await`.

use crate::clock::Clock;
use crate::conflict::{
    detect_conflict, ActiveConflict, Conflict, ConflictInputs, ConflictSet, Resolution,
    ResolutionOutcome,
};
use crate::kv::KeyValueStore;
use crate::meta::{MetaStore, SyncMeta};
use crate::remote::{ConflictPatch, RemoteDocument, RemoteDocumentStore, RemoteError};
use crate::session::SessionContext;
use crate::snapshot::{ApplicationState, StateBlob};
use crate::{error::Result, Error, ErrorClass, Timestamp, UserId, Version};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Write attempts for a forced sync racing other writers.
const MAX_FORCED_WRITE_ATTEMPTS: usize = 3;

/// Engine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Offline,
    Conflict,
    Error,
}

/// Per-call sync options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Skip the conflict test and the active-conflict block
    pub force: bool,
}

impl SyncOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Result of a sync attempt that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The local state is now the remote document at `version`.
    Synced {
        version: Version,
        updated_at: Timestamp,
        checksum: String,
    },
    /// Another sync was already in flight.
    Skipped,
    /// The remote diverged; nothing was written.
    Conflict {
        conflicts: Vec<Conflict>,
        remote: Option<RemoteDocument>,
    },
}

#[derive(Debug)]
struct EngineState {
    status: SyncStatus,
    pending_changes: u64,
    conflicts: ConflictSet,
    last_error: Option<Error>,
}

/// Orchestrates uploads, conflict detection and conflict resolution.
pub struct SyncEngine {
    session: Arc<SessionContext>,
    remote: Arc<dyn RemoteDocumentStore>,
    meta: MetaStore,
    clock: Arc<dyn Clock>,
    state: Mutex<EngineState>,
    status_tx: watch::Sender<SyncStatus>,
}

impl SyncEngine {
    /// Create an engine over an injected backend.
    pub fn new(
        session: Arc<SessionContext>,
        remote: Arc<dyn RemoteDocumentStore>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SyncStatus::Idle);
        Self {
            session,
            remote,
            meta: MetaStore::new(kv),
            clock,
            state: Mutex::new(EngineState {
                status: SyncStatus::Idle,
                pending_changes: 0,
                conflicts: ConflictSet::new(),
                last_error: None,
            }),
            status_tx,
        }
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn status(&self) -> SyncStatus {
        self.state.lock().status
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    /// Changes queued since the last successful sync.
    pub fn pending_changes(&self) -> u64 {
        self.state.lock().pending_changes
    }

    /// Error that put the engine into `Offline` or `Error`, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.state.lock().last_error.clone()
    }

    /// Unresolved conflicts, oldest first.
    pub fn active_conflicts(&self) -> Vec<Conflict> {
        self.state.lock().conflicts.conflicts()
    }

    /// What this device knows about the signed-in user's remote document.
    pub fn sync_meta(&self) -> Result<SyncMeta> {
        let user_id = self.session.user_id().ok_or(Error::NotAuthenticated)?;
        self.meta.load(&user_id)
    }

    /// Count a local change. Returns the new pending count.
    pub fn record_change(&self) -> u64 {
        let mut state = self.state.lock();
        state.pending_changes += 1;
        state.pending_changes
    }

    /// Push `local` to the remote document.
    ///
    /// Empty states are rejected up front. On success only the changes
    /// recorded before this call started are cleared from the pending count.
    pub async fn sync(
        &self,
        local: &ApplicationState,
        options: SyncOptions,
    ) -> Result<SyncOutcome> {
        local.validate()?;

        let (user_id, previous, covered) = {
            let mut state = self.state.lock();
            if state.status == SyncStatus::Syncing {
                tracing::debug!("Sync already in progress, skipping");
                return Ok(SyncOutcome::Skipped);
            }

            if let Err(err) = self.preflight() {
                tracing::info!(error = %err, "Sync unavailable");
                state.last_error = Some(err.clone());
                self.transition(&mut state, SyncStatus::Offline);
                return Err(err);
            }
            // preflight guarantees a user
            let user_id = self.session.user_id().ok_or(Error::NotAuthenticated)?;

            if !state.conflicts.is_empty() && !options.force {
                self.transition(&mut state, SyncStatus::Conflict);
                return Ok(SyncOutcome::Conflict {
                    conflicts: state.conflicts.conflicts(),
                    remote: state.conflicts.latest_remote(),
                });
            }

            let previous = state.status;
            self.transition(&mut state, SyncStatus::Syncing);
            (user_id, previous, state.pending_changes)
        };

        let mut guard = SyncingGuard {
            engine: self,
            previous,
            armed: true,
        };
        tracing::info!(user_id = %user_id, force = options.force, "Sync started");
        let result = self.run_sync(&user_id, local, options).await;
        guard.armed = false;

        self.finish(&user_id, covered, result)
    }

    fn preflight(&self) -> Result<()> {
        if !self.remote.capabilities().remote_sync || !self.session.is_online() {
            return Err(Error::Offline);
        }
        if self.session.user_id().is_none() {
            return Err(Error::NotAuthenticated);
        }
        Ok(())
    }

    async fn run_sync(
        &self,
        user_id: &str,
        local: &ApplicationState,
        options: SyncOptions,
    ) -> Result<SyncOutcome> {
        let meta = self.meta.load(user_id)?;
        let blob = StateBlob::seal(local)?;

        let mut current = self.remote.get_document(user_id).await?;
        let attempts = if options.force {
            MAX_FORCED_WRITE_ATTEMPTS
        } else {
            1
        };

        for attempt in 1..=attempts {
            if !options.force && Self::diverged(&meta, current.as_ref()) {
                return self.raise_conflict(user_id, &meta, current).await;
            }

            let version = current.as_ref().and_then(|d| d.version).unwrap_or(0) + 1;
            let updated_at = self.clock.now();
            let doc = RemoteDocument {
                user_id: user_id.to_string(),
                device_id: self.session.device_id().to_string(),
                state_json: blob.json.clone(),
                checksum: blob.checksum.clone(),
                updated_at,
                version: Some(version),
            };

            match self.remote.put_document(user_id, doc).await {
                Ok(()) => {
                    self.meta.advance(user_id, version, updated_at)?;
                    return Ok(SyncOutcome::Synced {
                        version,
                        updated_at,
                        checksum: blob.checksum,
                    });
                }
                Err(RemoteError::VersionConflict { expected, actual }) => {
                    tracing::warn!(
                        user_id = %user_id,
                        expected,
                        actual,
                        attempt,
                        "Remote moved between read and write"
                    );
                    current = self.remote.get_document(user_id).await?;
                    if !options.force {
                        return self.raise_conflict(user_id, &meta, current).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(Error::Unknown(format!(
            "remote version kept moving after {} forced writes",
            attempts
        )))
    }

    fn diverged(meta: &SyncMeta, remote: Option<&RemoteDocument>) -> bool {
        let Some(remote) = remote else {
            return false;
        };
        detect_conflict(&ConflictInputs {
            local_version: Some(meta.last_remote_version),
            remote_version: remote.version,
            local_synced_at: meta.last_remote_updated_at,
            remote_updated_at: Some(remote.updated_at),
        })
    }

    async fn raise_conflict(
        &self,
        user_id: &str,
        meta: &SyncMeta,
        remote: Option<RemoteDocument>,
    ) -> Result<SyncOutcome> {
        let conflict = Conflict::detected(
            user_id,
            meta.last_remote_version,
            meta.last_remote_updated_at,
            remote.as_ref(),
            self.clock.now(),
        );
        tracing::warn!(
            user_id = %user_id,
            conflict_id = %conflict.id,
            local_version = conflict.local_version,
            remote_version = ?conflict.remote_version,
            "Conflict detected"
        );

        if let Err(err) = self.remote.record_conflict(&conflict).await {
            tracing::warn!(
                conflict_id = %conflict.id,
                error = %err,
                "Failed to record conflict remotely"
            );
        }

        self.state.lock().conflicts.insert(ActiveConflict {
            conflict: conflict.clone(),
            remote: remote.clone(),
        });

        Ok(SyncOutcome::Conflict {
            conflicts: vec![conflict],
            remote,
        })
    }

    fn finish(
        &self,
        user_id: &str,
        covered: u64,
        result: Result<SyncOutcome>,
    ) -> Result<SyncOutcome> {
        let mut state = self.state.lock();
        match &result {
            Ok(SyncOutcome::Synced { version, .. }) => {
                // Changes recorded mid-flight are not in this upload
                state.pending_changes = state.pending_changes.saturating_sub(covered);
                tracing::info!(
                    user_id = %user_id,
                    version,
                    pending = state.pending_changes,
                    "Sync complete"
                );
                state.last_error = None;
                let next = if state.conflicts.is_empty() {
                    SyncStatus::Idle
                } else {
                    SyncStatus::Conflict
                };
                self.transition(&mut state, next);
            }
            Ok(SyncOutcome::Conflict { .. }) => {
                state.last_error = None;
                self.transition(&mut state, SyncStatus::Conflict);
            }
            Ok(SyncOutcome::Skipped) => {}
            Err(err) => {
                let next = match err.class() {
                    ErrorClass::Network | ErrorClass::Offline => SyncStatus::Offline,
                    ErrorClass::Permission | ErrorClass::Unknown => SyncStatus::Error,
                };
                tracing::warn!(
                    user_id = %user_id,
                    error = %err,
                    action = ?err.recommended_action(),
                    "Sync failed"
                );
                state.last_error = Some(err.clone());
                self.transition(&mut state, next);
            }
        }
        result
    }

    /// Resolve an active conflict.
    ///
    /// `Remote` verifies the carried payload and advances the local view of
    /// the remote version; `Local` tells the caller to force the next sync.
    /// Unknown or already resolved ids are `NotFound`.
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> Result<ResolutionOutcome> {
        let active = self
            .state
            .lock()
            .conflicts
            .get(conflict_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("active conflict {}", conflict_id)))?;

        // Validate before touching anything
        let outcome = active.outcome(resolution)?;

        if let ResolutionOutcome::ApplyRemote {
            version,
            updated_at,
            ..
        } = &outcome
        {
            let user_id = &active.conflict.user_id;
            match version {
                Some(version) => self.meta.advance(user_id, *version, *updated_at)?,
                // Unversioned document: only its timestamp can be remembered
                None => self.meta.observe_timestamp(user_id, *updated_at)?,
            };
        }

        let resolved_at = self.clock.now();
        {
            let mut state = self.state.lock();
            if state.conflicts.take(conflict_id).is_none() {
                return Err(Error::NotFound(format!("active conflict {}", conflict_id)));
            }
            if state.conflicts.is_empty() && state.status == SyncStatus::Conflict {
                self.transition(&mut state, SyncStatus::Idle);
            }
        }

        tracing::info!(conflict_id = %conflict_id, ?resolution, "Conflict resolved");

        let patch = ConflictPatch {
            resolved_at: Some(resolved_at),
            resolution: Some(resolution),
        };
        if let Err(err) = self.remote.update_conflict(conflict_id, patch).await {
            tracing::warn!(
                conflict_id = %conflict_id,
                error = %err,
                "Failed to persist conflict resolution"
            );
        }

        Ok(outcome)
    }

    /// Load unresolved conflicts recorded remotely (e.g. by a previous session).
    ///
    /// Returns how many were added to the active set.
    pub async fn refresh_conflicts(&self) -> Result<usize> {
        self.preflight()?;
        let user_id = self.session.user_id().ok_or(Error::NotAuthenticated)?;

        let stored = self.remote.query_conflicts(&user_id).await?;
        let unresolved: Vec<Conflict> = stored.into_iter().filter(|c| !c.is_resolved()).collect();
        let remote = if unresolved.is_empty() {
            None
        } else {
            self.remote.get_document(&user_id).await?
        };

        let mut state = self.state.lock();
        let mut added = 0;
        for conflict in unresolved {
            let active = ActiveConflict {
                conflict,
                remote: remote.clone(),
            };
            if state.conflicts.insert(active) {
                added += 1;
            }
        }
        if added > 0 && state.status != SyncStatus::Syncing {
            self.transition(&mut state, SyncStatus::Conflict);
        }
        tracing::debug!(user_id = %user_id, added, "Refreshed conflicts");
        Ok(added)
    }

    fn transition(&self, state: &mut EngineState, next: SyncStatus) {
        if state.status != next {
            tracing::debug!(from = ?state.status, to = ?next, "Status transition");
            state.status = next;
            self.status_tx.send_replace(next);
        }
    }

    fn user_scope(&self) -> Option<UserId> {
        self.session.user_id()
    }
}

/// Puts back the pre-sync status if a sync future is dropped before finishing.
struct SyncingGuard<'a> {
    engine: &'a SyncEngine,
    previous: SyncStatus,
    armed: bool,
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.engine.state.lock();
            if state.status == SyncStatus::Syncing {
                tracing::warn!(user_id = ?self.engine.user_scope(), "Sync abandoned mid-flight");
                self.engine.transition(&mut state, self.previous);
            }
        }
    }
}
