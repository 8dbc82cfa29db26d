//! Sync trigger scheduling.
//!
//! Three kinds of trigger feed one channel:
//!
//! - **Debounced**: fired once the change stream has been quiet for the
//!   debounce window. Each new change cancels the pending timer, so a burst
//!   of changes yields a single trigger.
//! - **Interval**: periodic auto-sync while online and signed in.
//! - **Retry**: a delayed re-attempt after a failed automatic sync.
//!
//! The scheduler only emits triggers; whoever owns the receiver decides
//! what a trigger does.

use crate::session::SessionContext;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Why a sync was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Debounced,
    Interval,
    Retry { attempt: u32 },
}

/// Owns the timer tasks. Dropping it cancels them.
#[derive(Debug)]
pub struct Scheduler {
    debounce: Duration,
    tx: mpsc::UnboundedSender<SyncTrigger>,
    debounce_task: Mutex<Option<JoinHandle<()>>>,
    interval_task: Mutex<Option<JoinHandle<()>>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(debounce: Duration) -> (Self, mpsc::UnboundedReceiver<SyncTrigger>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            debounce,
            tx,
            debounce_task: Mutex::new(None),
            interval_task: Mutex::new(None),
            retry_task: Mutex::new(None),
        };
        (scheduler, rx)
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Restart the debounce timer.
    ///
    /// Returns `false` when called outside a tokio runtime, in which case no
    /// trigger is scheduled.
    pub fn schedule_debounced(&self) -> bool {
        let Some(handle) = current_runtime() else {
            return false;
        };

        let mut slot = self.debounce_task.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let tx = self.tx.clone();
        let debounce = self.debounce;
        *slot = Some(handle.spawn(async move {
            tokio::time::sleep(debounce).await;
            tracing::debug!(?debounce, "Debounce window elapsed");
            let _ = tx.send(SyncTrigger::Debounced);
        }));
        true
    }

    /// Whether a debounced trigger is waiting to fire.
    pub fn has_pending_debounce(&self) -> bool {
        self.debounce_task
            .lock()
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start periodic triggers, replacing any running interval.
    ///
    /// Ticks are skipped while offline or signed out. The first trigger fires
    /// one full `period` after the call.
    pub fn start_interval(&self, period: Duration, session: Arc<SessionContext>) -> bool {
        if period.is_zero() {
            tracing::warn!("Ignoring zero auto-sync interval");
            return false;
        }
        let Some(handle) = current_runtime() else {
            return false;
        };

        let tx = self.tx.clone();
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval() fires immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if !session.is_online() || session.user_id().is_none() {
                    tracing::trace!("Auto-sync tick skipped");
                    continue;
                }
                if tx.send(SyncTrigger::Interval).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.interval_task.lock().replace(task) {
            previous.abort();
        }
        tracing::info!(?period, "Auto-sync interval started");
        true
    }

    pub fn stop_interval(&self) {
        if let Some(task) = self.interval_task.lock().take() {
            task.abort();
            tracing::info!("Auto-sync interval stopped");
        }
    }

    /// Emit a `Retry` trigger after `delay`, replacing any pending retry.
    pub fn schedule_retry(&self, attempt: u32, delay: Duration) -> bool {
        let Some(handle) = current_runtime() else {
            return false;
        };

        let tx = self.tx.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(SyncTrigger::Retry { attempt });
        });
        if let Some(previous) = self.retry_task.lock().replace(task) {
            previous.abort();
        }
        tracing::debug!(attempt, ?delay, "Retry scheduled");
        true
    }

    pub fn cancel_retry(&self) {
        if let Some(task) = self.retry_task.lock().take() {
            task.abort();
        }
    }

    /// Cancel every timer.
    pub fn shutdown(&self) {
        for slot in [&self.debounce_task, &self.interval_task, &self.retry_task] {
            if let Some(task) = slot.lock().take() {
                task.abort();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn current_runtime() -> Option<Handle> {
    match Handle::try_current() {
        Ok(handle) => Some(handle),
        Err(_) => {
            tracing::warn!("No tokio runtime; sync trigger not scheduled");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_yields_one_trigger() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_secs(2));

        for _ in 0..5 {
            assert!(scheduler.schedule_debounced());
            sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
        assert!(scheduler.has_pending_debounce());

        sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv(), Ok(SyncTrigger::Debounced));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_quiet_periods_trigger_separately() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_secs(1));

        scheduler.schedule_debounced();
        sleep(Duration::from_secs(2)).await;
        scheduler.schedule_debounced();
        sleep(Duration::from_secs(2)).await;

        assert_eq!(rx.try_recv(), Ok(SyncTrigger::Debounced));
        assert_eq!(rx.try_recv(), Ok(SyncTrigger::Debounced));
    }

    #[tokio::test(start_paused = true)]
    async fn interval_respects_session() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_secs(1));
        let session = Arc::new(SessionContext::new("device-1").with_user("user-1"));

        assert!(scheduler.start_interval(Duration::from_secs(60), session.clone()));
        sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_recv(), Ok(SyncTrigger::Interval));

        session.set_online(false);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        session.set_online(true);
        session.sign_out();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        scheduler.stop_interval();
        session.sign_in("user-1");
        sleep(Duration::from_secs(120)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_fires_after_delay() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_secs(1));

        scheduler.schedule_retry(1, Duration::from_secs(4));
        sleep(Duration::from_secs(3)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));

        sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv(), Ok(SyncTrigger::Retry { attempt: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_timers() {
        let (scheduler, mut rx) = Scheduler::new(Duration::from_secs(1));
        scheduler.schedule_debounced();
        scheduler.schedule_retry(1, Duration::from_secs(1));
        scheduler.shutdown();

        sleep(Duration::from_secs(5)).await;
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn no_runtime_schedules_nothing() {
        let (scheduler, _rx) = Scheduler::new(Duration::from_secs(1));
        assert!(!scheduler.schedule_debounced());
        assert!(!scheduler.has_pending_debounce());
    }
}
