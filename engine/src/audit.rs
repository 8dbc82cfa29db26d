//! Append-only audit log of user-visible changes.

use crate::clock::Clock;
use crate::error::Result;
use crate::record::{AuditAction, AuditLogEntry};
use crate::session::SessionContext;
use crate::store::ScopedStore;
use serde_json::Value;
use std::sync::Arc;

/// A change to record. Id and timestamp are assigned on append.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditChange {
    pub transaction_id: String,
    pub action: AuditAction,
    pub previous_state: Option<Value>,
    pub new_state: Option<Value>,
    /// Defaults to the current scope (user id, or device id when signed out)
    pub changed_by: Option<String>,
}

impl AuditChange {
    pub fn new(transaction_id: impl Into<String>, action: AuditAction) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            action,
            previous_state: None,
            new_state: None,
            changed_by: None,
        }
    }

    pub fn with_previous(mut self, state: Value) -> Self {
        self.previous_state = Some(state);
        self
    }

    pub fn with_new(mut self, state: Value) -> Self {
        self.new_state = Some(state);
        self
    }

    pub fn changed_by(mut self, who: impl Into<String>) -> Self {
        self.changed_by = Some(who.into());
        self
    }
}

#[derive(Debug)]
pub struct AuditLog {
    store: ScopedStore<AuditLogEntry>,
    session: Arc<SessionContext>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(
        store: ScopedStore<AuditLogEntry>,
        session: Arc<SessionContext>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            session,
            clock,
        }
    }

    /// Append an entry, evicting the oldest past retention.
    pub fn log_change(&self, change: AuditChange) -> Result<AuditLogEntry> {
        let scope = self.session.scope();
        let entry = AuditLogEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: scope.clone(),
            transaction_id: change.transaction_id,
            action: change.action,
            previous_state: change.previous_state,
            new_state: change.new_state,
            changed_by: change.changed_by.unwrap_or_else(|| scope.clone()),
            changed_at: self.clock.now(),
        };
        tracing::debug!(
            scope = %scope,
            transaction_id = %entry.transaction_id,
            action = ?entry.action,
            "Audit entry appended"
        );
        self.store.create(&scope, entry)
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        self.store.list(&self.session.scope(), limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::kv::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;

    fn audit_log(retention: usize) -> (AuditLog, Arc<SessionContext>, Arc<ManualClock>) {
        let session = Arc::new(SessionContext::new("device-1").with_user("user-1"));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = ScopedStore::new(Arc::new(MemoryStore::new()), retention);
        (
            AuditLog::new(store, session.clone(), clock.clone()),
            session,
            clock,
        )
    }

    #[test]
    fn entries_are_stamped_and_newest_first() {
        let (log, _, clock) = audit_log(100);

        let first = log
            .log_change(
                AuditChange::new("tx-1", AuditAction::Create).with_new(json!({"amount": 5})),
            )
            .unwrap();
        clock.advance(Duration::minutes(1));
        let second = log
            .log_change(
                AuditChange::new("tx-1", AuditAction::Update)
                    .with_previous(json!({"amount": 5}))
                    .with_new(json!({"amount": 7})),
            )
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.changed_by, "user-1");
        assert!(second.changed_at > first.changed_at);

        let listed = log.list(10).unwrap();
        assert_eq!(listed, vec![second, first]);
    }

    #[test]
    fn capped_per_scope() {
        let (log, _, _) = audit_log(3);
        for i in 0..5 {
            log.log_change(AuditChange::new(format!("tx-{}", i), AuditAction::Delete))
                .unwrap();
        }
        let ids: Vec<_> = log
            .list(10)
            .unwrap()
            .into_iter()
            .map(|e| e.transaction_id)
            .collect();
        assert_eq!(ids, vec!["tx-4", "tx-3", "tx-2"]);
    }

    #[test]
    fn signed_out_entries_use_device_scope() {
        let (log, session, _) = audit_log(100);
        log.log_change(AuditChange::new("tx-1", AuditAction::Create))
            .unwrap();

        session.sign_out();
        assert!(log.list(10).unwrap().is_empty());

        let entry = log
            .log_change(AuditChange::new("tx-2", AuditAction::Create).changed_by("importer"))
            .unwrap();
        assert_eq!(entry.user_id, "device-1");
        assert_eq!(entry.changed_by, "importer");
    }
}
