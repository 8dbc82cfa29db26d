//! Restore points: named snapshots of application state.

use crate::audit::{AuditChange, AuditLog};
use crate::clock::Clock;
use crate::error::Result;
use crate::record::{AuditAction, RestorePoint, SnapshotType};
use crate::session::SessionContext;
use crate::snapshot::{ApplicationState, StateBlob};
use crate::store::ScopedStore;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug)]
pub struct RestorePointManager {
    store: ScopedStore<RestorePoint>,
    audit: Arc<AuditLog>,
    session: Arc<SessionContext>,
    clock: Arc<dyn Clock>,
}

impl RestorePointManager {
    pub fn new(
        store: ScopedStore<RestorePoint>,
        audit: Arc<AuditLog>,
        session: Arc<SessionContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            audit,
            session,
            clock,
        }
    }

    /// Snapshot `state` under `name`.
    ///
    /// Empty states are rejected since they could never be restored.
    pub fn create(
        &self,
        name: impl Into<String>,
        snapshot_type: SnapshotType,
        state: &ApplicationState,
    ) -> Result<RestorePoint> {
        state.validate()?;
        let blob = StateBlob::seal(state)?;
        let scope = self.session.scope();

        let point = RestorePoint {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: scope.clone(),
            name: name.into(),
            snapshot_type,
            state_json: blob.json,
            checksum: blob.checksum,
            size_bytes: blob.size_bytes,
            device_id: self.session.device_id().to_string(),
            created_at: self.clock.now(),
        };
        tracing::info!(
            scope = %scope,
            restore_point_id = %point.id,
            snapshot_type = ?point.snapshot_type,
            size_bytes = point.size_bytes,
            "Restore point created"
        );
        self.store.create(&scope, point)
    }

    /// Automatic snapshot taken right before a destructive operation.
    pub fn create_auto(&self, label: &str, state: &ApplicationState) -> Result<RestorePoint> {
        self.create(format!("Auto: {}", label), SnapshotType::Auto, state)
    }

    /// Verify and decode `point` for the caller to apply.
    ///
    /// A corrupt or empty payload fails before anything is written. When
    /// `current` holds data it is snapshotted first; if that snapshot cannot
    /// be stored the restore is abandoned.
    pub fn restore(
        &self,
        point: &RestorePoint,
        current: Option<&ApplicationState>,
    ) -> Result<ApplicationState> {
        let state = StateBlob::open(&point.state_json, &point.checksum)?;

        if let Some(current) = current.filter(|s| !s.is_empty()) {
            self.create_auto(&format!("before restoring {}", point.name), current)?;
        }

        let change = AuditChange::new(point.id.clone(), AuditAction::Restore).with_new(json!({
            "name": point.name,
            "checksum": point.checksum,
            "createdAt": point.created_at,
        }));
        if let Err(err) = self.audit.log_change(change) {
            tracing::warn!(restore_point_id = %point.id, error = %err, "Failed to audit restore");
        }

        tracing::info!(restore_point_id = %point.id, name = %point.name, "Restore point applied");
        Ok(state)
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<RestorePoint>> {
        self.store.list(&self.session.scope(), limit)
    }

    pub fn get(&self, id: &str) -> Result<Option<RestorePoint>> {
        self.store.get(&self.session.scope(), id)
    }

    /// Returns whether a point was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.store.delete(&self.session.scope(), id)?;
        if removed {
            tracing::info!(restore_point_id = %id, "Restore point deleted");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryStore;
    use crate::Error;
    use chrono::{Duration, TimeZone, Utc};

    struct Fixture {
        manager: RestorePointManager,
        audit: Arc<AuditLog>,
        clock: Arc<ManualClock>,
    }

    fn fixture(kv: Arc<MemoryStore>) -> Fixture {
        let session = Arc::new(SessionContext::new("device-1").with_user("user-1"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let audit = Arc::new(AuditLog::new(
            ScopedStore::new(kv.clone(), 100),
            session.clone(),
            clock.clone(),
        ));
        let manager = RestorePointManager::new(
            ScopedStore::new(kv, 10),
            audit.clone(),
            session,
            clock.clone(),
        );
        Fixture {
            manager,
            audit,
            clock,
        }
    }

    fn state(tag: &str) -> ApplicationState {
        ApplicationState::default().with_transactions(json!([{ "id": tag }]))
    }

    #[test]
    fn retention_keeps_newest_ten() {
        let f = fixture(Arc::new(MemoryStore::new()));
        for i in 0..11 {
            f.manager
                .create(format!("point {}", i), SnapshotType::Manual, &state("tx"))
                .unwrap();
            f.clock.advance(Duration::seconds(1));
        }

        let points = f.manager.list(100).unwrap();
        assert_eq!(points.len(), 10);
        assert_eq!(points[0].name, "point 10");
        assert!(points.iter().all(|p| p.name != "point 0"));
    }

    #[test]
    fn create_rejects_empty_state() {
        let f = fixture(Arc::new(MemoryStore::new()));
        let err = f
            .manager
            .create("empty", SnapshotType::Manual, &ApplicationState::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
        assert!(f.manager.list(10).unwrap().is_empty());
    }

    #[test]
    fn restore_backs_up_current_state_and_audits() {
        let f = fixture(Arc::new(MemoryStore::new()));
        let point = f
            .manager
            .create("month end", SnapshotType::Manual, &state("old"))
            .unwrap();

        let restored = f.manager.restore(&point, Some(&state("current"))).unwrap();
        assert_eq!(restored, state("old"));

        let points = f.manager.list(10).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].snapshot_type, SnapshotType::Auto);
        assert_eq!(
            StateBlob::open(&points[0].state_json, &points[0].checksum).unwrap(),
            state("current")
        );

        let entries = f.audit.list(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::Restore);
        assert_eq!(entries[0].transaction_id, point.id);
    }

    #[test]
    fn invalid_payload_changes_nothing() {
        let f = fixture(Arc::new(MemoryStore::new()));
        let empty = StateBlob::seal(&ApplicationState::default()).unwrap();
        let point = RestorePoint {
            id: "rp-bad".into(),
            user_id: "user-1".into(),
            name: "bad".into(),
            snapshot_type: SnapshotType::Manual,
            state_json: empty.json,
            checksum: empty.checksum,
            size_bytes: empty.size_bytes,
            device_id: "device-1".into(),
            created_at: f.clock.now(),
        };

        let err = f.manager.restore(&point, Some(&state("current"))).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
        assert!(f.manager.list(10).unwrap().is_empty());
        assert!(f.audit.list(10).unwrap().is_empty());
    }

    #[test]
    fn tampered_point_fails_checksum() {
        let f = fixture(Arc::new(MemoryStore::new()));
        let mut point = f
            .manager
            .create("snap", SnapshotType::Manual, &state("a"))
            .unwrap();
        point.state_json = point.state_json.replace("\"a\"", "\"b\"");

        let err = f.manager.restore(&point, None).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn failed_backup_aborts_restore() {
        let kv = Arc::new(MemoryStore::new());
        let f = fixture(kv.clone());
        let point = f
            .manager
            .create("snap", SnapshotType::Manual, &state("a"))
            .unwrap();

        // Room for nothing more
        let tight = fixture(Arc::new(MemoryStore::with_quota(kv.used_bytes())));
        let err = tight
            .manager
            .restore(&point, Some(&state("current")))
            .unwrap_err();
        assert!(matches!(err, Error::StorageQuotaExceeded(_)));
        assert!(tight.audit.list(10).unwrap().is_empty());
    }

    #[test]
    fn delete_and_get() {
        let f = fixture(Arc::new(MemoryStore::new()));
        let point = f
            .manager
            .create("snap", SnapshotType::Scheduled, &state("a"))
            .unwrap();

        assert_eq!(f.manager.get(&point.id).unwrap(), Some(point.clone()));
        assert!(f.manager.delete(&point.id).unwrap());
        assert!(!f.manager.delete(&point.id).unwrap());
        assert_eq!(f.manager.get(&point.id).unwrap(), None);
    }
}
