//! Background flush scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::store::{LocalStore, RemoteStore};
use crate::sync::SyncEngine;

/// Periodic trigger for [`SyncEngine::sync`].
///
/// An explicit lifecycle object: `start` is idempotent while the task is
/// alive, `stop` (or drop) shuts it down. Shutdown is observed between
/// iterations, never in the middle of a flush, so a drained batch always
/// lands or is restored before the task exits.
pub struct AutoSync {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl AutoSync {
    pub fn new() -> Self {
        AutoSync {
            handle: None,
            shutdown: None,
        }
    }

    /// Spawns the periodic flush task. Calling `start` again while the task
    /// is alive is a no-op, so lifecycle hooks can call it freely.
    pub fn start<R, L>(&mut self, engine: Arc<SyncEngine<R, L>>, every: Duration)
    where
        R: RemoteStore + 'static,
        L: LocalStore + 'static,
    {
        if self.is_running() {
            log::debug!("[SCHED] already running");
            return;
        }
        log::info!("[SCHED] auto-sync every {every:?}");
        let (tx, mut rx) = oneshot::channel::<()>();
        self.shutdown = Some(tx);
        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The interval's first tick is immediate; the session load
            // already reconciled, so consume it and start on the cadence.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine.sync().await {
                            log::warn!("[SCHED] scheduled flush failed: {e:#}");
                        }
                    }
                }
            }
            log::debug!("[SCHED] task exited");
        }));
    }

    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
            && self
                .handle
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false)
    }

    /// Signals the task to exit after its current iteration and detaches it.
    pub fn stop(&mut self) {
        if self.shutdown.take().is_some() {
            log::info!("[SCHED] stopping");
        }
        self.handle = None;
    }
}

impl Default for AutoSync {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AutoSync {
    fn drop(&mut self) {
        self.stop();
    }
}
