//! Persisted record types: restore points and audit log entries.

use crate::{DeviceId, Timestamp, UserId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Default number of restore points kept per scope.
pub const RESTORE_POINT_RETENTION: usize = 10;

/// Default number of audit entries kept per scope.
pub const AUDIT_LOG_RETENTION: usize = 100;

/// A record stored in a scoped, retained collection.
pub trait ScopedRecord: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// Collection name, also the legacy unscoped storage key.
    const COLLECTION: &'static str;

    /// Unique id of this record within its scope.
    fn id(&self) -> &str;
}

/// Why a restore point was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    /// Created explicitly by the user
    Manual,
    /// Taken right before a destructive operation
    Auto,
    /// Taken by a periodic schedule
    Scheduled,
}

/// A named, immutable snapshot usable to roll back state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestorePoint {
    pub id: String,
    pub user_id: UserId,
    pub name: String,
    pub snapshot_type: SnapshotType,
    pub state_json: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub device_id: DeviceId,
    pub created_at: Timestamp,
}

impl ScopedRecord for RestorePoint {
    const COLLECTION: &'static str = "restore_points";

    fn id(&self) -> &str {
        &self.id
    }
}

/// Kind of change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Restore,
}

/// One append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: String,
    pub user_id: UserId,
    pub transaction_id: String,
    pub action: AuditAction,
    pub previous_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub changed_by: String,
    pub changed_at: Timestamp,
}

impl ScopedRecord for AuditLogEntry {
    const COLLECTION: &'static str = "audit_log";

    fn id(&self) -> &str {
        &self.id
    }
}
