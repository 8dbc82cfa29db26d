//! Public facade tying the engine, scheduler and local stores together.

use crate::audit::{AuditChange, AuditLog};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::conflict::{Conflict, Resolution, ResolutionOutcome};
use crate::engine::{SyncEngine, SyncOptions, SyncOutcome, SyncStatus};
use crate::error::Result;
use crate::kv::KeyValueStore;
use crate::record::{AuditLogEntry, RestorePoint, SnapshotType};
use crate::remote::{LocalOnly, RemoteDocumentStore};
use crate::restore::RestorePointManager;
use crate::scheduler::{Scheduler, SyncTrigger};
use crate::session::SessionContext;
use crate::snapshot::ApplicationState;
use crate::store::ScopedStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Supplies the state to upload when a sync is triggered automatically.
pub trait StateSource: Send + Sync {
    /// Current application state, or `None` to skip this trigger.
    fn current_state(&self) -> Option<ApplicationState>;

    /// Called after every automatic sync attempt.
    fn on_sync_result(&self, _result: &Result<SyncOutcome>) {}
}

/// The sync, restore point and audit API exposed to the application.
pub struct SyncService {
    config: EngineConfig,
    engine: Arc<SyncEngine>,
    scheduler: Arc<Scheduler>,
    triggers: Mutex<Option<mpsc::UnboundedReceiver<SyncTrigger>>>,
    force_next: Arc<AtomicBool>,
    restore_points: RestorePointManager,
    audit: Arc<AuditLog>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SyncService {
    /// Create a service on the system clock.
    pub fn new(
        config: EngineConfig,
        session: Arc<SessionContext>,
        remote: Arc<dyn RemoteDocumentStore>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::with_clock(config, session, remote, kv, Arc::new(SystemClock))
    }

    /// Create a service with no cloud backend. Syncs report `Offline`.
    pub fn local_only(
        config: EngineConfig,
        session: Arc<SessionContext>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self::new(config, session, Arc::new(LocalOnly), kv)
    }

    pub fn with_clock(
        config: EngineConfig,
        session: Arc<SessionContext>,
        remote: Arc<dyn RemoteDocumentStore>,
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(SyncEngine::new(
            session.clone(),
            remote,
            kv.clone(),
            clock.clone(),
        ));
        let audit = Arc::new(AuditLog::new(
            ScopedStore::new(kv.clone(), config.audit_log_retention),
            session.clone(),
            clock.clone(),
        ));
        let restore_points = RestorePointManager::new(
            ScopedStore::new(kv, config.restore_point_retention),
            audit.clone(),
            session,
            clock,
        );
        let (scheduler, rx) = Scheduler::new(config.debounce);

        Self {
            config,
            engine,
            scheduler: Arc::new(scheduler),
            triggers: Mutex::new(Some(rx)),
            force_next: Arc::new(AtomicBool::new(false)),
            restore_points,
            audit,
            driver: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    pub fn status(&self) -> SyncStatus {
        self.engine.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.engine.subscribe()
    }

    pub fn pending_changes(&self) -> u64 {
        self.engine.pending_changes()
    }

    pub fn active_conflicts(&self) -> Vec<Conflict> {
        self.engine.active_conflicts()
    }

    /// Record a local change and restart the debounce timer.
    ///
    /// Returns the number of changes waiting to be synced.
    pub fn queue_change(&self) -> u64 {
        let pending = self.engine.record_change();
        self.scheduler.schedule_debounced();
        pending
    }

    /// Sync now.
    ///
    /// A sync following a `Local` conflict resolution is forced even when
    /// `options` does not ask for it.
    pub async fn trigger_sync(
        &self,
        state: &ApplicationState,
        options: SyncOptions,
    ) -> Result<SyncOutcome> {
        run_sync(&self.engine, &self.force_next, state, options).await
    }

    /// Resolve an active conflict. See [`SyncEngine::resolve_conflict`].
    pub async fn resolve_conflict(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> Result<ResolutionOutcome> {
        let outcome = self.engine.resolve_conflict(conflict_id, resolution).await?;
        if let ResolutionOutcome::KeepLocal {
            force_next_sync: true,
        } = outcome
        {
            self.force_next.store(true, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    /// Load conflicts recorded remotely into the active set.
    pub async fn refresh_conflicts(&self) -> Result<usize> {
        self.engine.refresh_conflicts().await
    }

    pub fn create_restore_point(
        &self,
        name: impl Into<String>,
        snapshot_type: SnapshotType,
        state: &ApplicationState,
    ) -> Result<RestorePoint> {
        self.restore_points.create(name, snapshot_type, state)
    }

    /// Snapshot `state` before a destructive operation described by `label`.
    pub fn create_auto_restore_point(
        &self,
        label: &str,
        state: &ApplicationState,
    ) -> Result<RestorePoint> {
        self.restore_points.create_auto(label, state)
    }

    /// Decode a restore point for the caller to apply. See
    /// [`RestorePointManager::restore`].
    pub fn restore(
        &self,
        point: &RestorePoint,
        current: Option<&ApplicationState>,
    ) -> Result<ApplicationState> {
        self.restore_points.restore(point, current)
    }

    pub fn list_restore_points(&self, limit: usize) -> Result<Vec<RestorePoint>> {
        self.restore_points.list(limit)
    }

    pub fn delete_restore_point(&self, id: &str) -> Result<bool> {
        self.restore_points.delete(id)
    }

    pub fn log_change(&self, change: AuditChange) -> Result<AuditLogEntry> {
        self.audit.log_change(change)
    }

    pub fn list_audit_log(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        self.audit.list(limit)
    }

    /// Take the trigger receiver to drive syncs yourself.
    ///
    /// `None` once taken, including by [`SyncService::start_auto_sync`].
    pub fn triggers(&self) -> Option<mpsc::UnboundedReceiver<SyncTrigger>> {
        self.triggers.lock().take()
    }

    /// Drive syncs from triggers using `source` for the state.
    ///
    /// Starts the periodic interval when configured and retries retryable
    /// failures with the configured backoff. Returns `false` if the triggers
    /// were already taken or there is no tokio runtime.
    pub fn start_auto_sync(&self, source: Arc<dyn StateSource>) -> bool {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!("No tokio runtime; auto-sync not started");
            return false;
        };
        let Some(mut rx) = self.triggers() else {
            tracing::warn!("Sync triggers already taken; auto-sync not started");
            return false;
        };

        if let Some(period) = self.config.auto_sync_interval {
            self.scheduler
                .start_interval(period, self.engine.session().clone());
        }

        let engine = self.engine.clone();
        let scheduler = self.scheduler.clone();
        let force_next = self.force_next.clone();
        let retry = self.config.retry.clone();

        let task = handle.spawn(async move {
            let mut failures: u32 = 0;
            while let Some(trigger) = rx.recv().await {
                let Some(state) = source.current_state() else {
                    tracing::debug!(?trigger, "No state to sync");
                    continue;
                };
                tracing::debug!(?trigger, "Auto-sync triggered");

                let result = run_sync(&engine, &force_next, &state, SyncOptions::default()).await;
                match &result {
                    Ok(SyncOutcome::Skipped) => {}
                    Ok(_) => {
                        failures = 0;
                        scheduler.cancel_retry();
                    }
                    Err(err) if err.is_retryable() => match retry.delay_for(failures) {
                        Some(delay) => {
                            failures += 1;
                            scheduler.schedule_retry(failures, delay);
                        }
                        None => {
                            tracing::warn!(
                                attempts = failures,
                                error = %err,
                                "Giving up on retries"
                            );
                            failures = 0;
                        }
                    },
                    Err(_) => failures = 0,
                }

                // Another sync was running, or changes landed after the upload began
                let rearm = matches!(
                    result,
                    Ok(SyncOutcome::Synced { .. } | SyncOutcome::Skipped)
                );
                let pending = engine.pending_changes();
                if rearm && pending > 0 {
                    tracing::debug!(pending, "Changes still pending, re-arming debounce");
                    scheduler.schedule_debounced();
                }
                source.on_sync_result(&result);
            }
            tracing::debug!("Auto-sync driver stopped");
        });

        if let Some(previous) = self.driver.lock().replace(task) {
            previous.abort();
        }
        tracing::info!("Auto-sync started");
        true
    }

    /// Stop timers and the auto-sync driver.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
        if let Some(task) = self.driver.lock().take() {
            task.abort();
        }
    }
}

impl Drop for SyncService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_sync(
    engine: &SyncEngine,
    force_next: &AtomicBool,
    state: &ApplicationState,
    options: SyncOptions,
) -> Result<SyncOutcome> {
    let pending_force = force_next.swap(false, Ordering::SeqCst);
    let options = SyncOptions {
        force: options.force || pending_force,
    };
    let result = engine.sync(state, options).await;
    if pending_force && !matches!(result, Ok(SyncOutcome::Synced { .. })) {
        force_next.store(true, Ordering::SeqCst);
    }
    result
}
