//! Conflict detection and the conflict lifecycle.
//!
//! A conflict is detected → surfaced (unresolved, in the active set) →
//! resolved as `local` or `remote` → removed from the active set. Several can
//! accumulate before the user resolves them.

use crate::remote::RemoteDocument;
use crate::snapshot::{ApplicationState, StateBlob};
use crate::{error::Result, Error, Timestamp, UserId, Version};
use serde::{Deserialize, Serialize};

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Keep this device's state and push it over the remote
    Local,
    /// Replace this device's state with the remote document
    Remote,
}

/// A detected divergence between local and remote state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub user_id: UserId,
    pub detected_at: Timestamp,
    pub local_updated_at: Option<Timestamp>,
    pub remote_updated_at: Option<Timestamp>,
    pub local_version: Version,
    pub remote_version: Option<Version>,
    pub resolved_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl Conflict {
    /// Record a fresh, unresolved conflict.
    pub fn detected(
        user_id: impl Into<UserId>,
        local_version: Version,
        local_updated_at: Option<Timestamp>,
        remote: Option<&RemoteDocument>,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            detected_at,
            local_updated_at,
            remote_updated_at: remote.map(|d| d.updated_at),
            local_version,
            remote_version: remote.and_then(|d| d.version),
            resolved_at: None,
            resolution: None,
        }
    }

    /// Whether a resolution has been recorded.
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Inputs to the divergence test. Any of them may be unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConflictInputs {
    pub local_version: Option<Version>,
    pub remote_version: Option<Version>,
    pub local_synced_at: Option<Timestamp>,
    pub remote_updated_at: Option<Timestamp>,
}

/// Decide whether the remote has moved past what this device last saw.
///
/// Versions decide when both are known. Otherwise timestamps decide when
/// both are known. With neither pair available there is no conflict.
pub fn detect_conflict(inputs: &ConflictInputs) -> bool {
    if let (Some(local), Some(remote)) = (inputs.local_version, inputs.remote_version) {
        return remote > local;
    }
    if let (Some(synced), Some(remote)) = (inputs.local_synced_at, inputs.remote_updated_at) {
        return remote > synced;
    }
    false
}

/// What the caller must do after resolving a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// Replace local state wholesale with `state`.
    ApplyRemote {
        state: ApplicationState,
        version: Option<Version>,
        updated_at: Timestamp,
    },
    /// Keep local state; the next sync should be forced past the remote.
    KeepLocal { force_next_sync: bool },
}

/// An unresolved conflict together with the remote payload seen at detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveConflict {
    pub conflict: Conflict,
    pub remote: Option<RemoteDocument>,
}

impl ActiveConflict {
    /// Build the outcome for `resolution`, verifying any remote payload.
    pub fn outcome(&self, resolution: Resolution) -> Result<ResolutionOutcome> {
        match resolution {
            Resolution::Local => Ok(ResolutionOutcome::KeepLocal {
                force_next_sync: true,
            }),
            Resolution::Remote => {
                let doc = self.remote.as_ref().ok_or_else(|| {
                    Error::NotFound(format!(
                        "remote payload for conflict {}",
                        self.conflict.id
                    ))
                })?;
                let state = StateBlob::open(&doc.state_json, &doc.checksum)?;
                Ok(ResolutionOutcome::ApplyRemote {
                    state,
                    version: doc.version,
                    updated_at: doc.updated_at,
                })
            }
        }
    }
}

/// The engine's active (unresolved) conflicts, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ConflictSet {
    entries: Vec<ActiveConflict>,
}

impl ConflictSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a conflict. Resolved or already known conflicts are ignored.
    pub fn insert(&mut self, active: ActiveConflict) -> bool {
        if active.conflict.is_resolved() || self.contains(&active.conflict.id) {
            return false;
        }
        self.entries.push(active);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|a| a.conflict.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&ActiveConflict> {
        self.entries.iter().find(|a| a.conflict.id == id)
    }

    /// Remove and return a conflict.
    pub fn take(&mut self, id: &str) -> Option<ActiveConflict> {
        let index = self.entries.iter().position(|a| a.conflict.id == id)?;
        Some(self.entries.remove(index))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of the unresolved conflicts.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.entries.iter().map(|a| a.conflict.clone()).collect()
    }

    /// Most recent remote payload carried by any active conflict.
    pub fn latest_remote(&self) -> Option<RemoteDocument> {
        self.entries.iter().rev().find_map(|a| a.remote.clone())
    }
}
