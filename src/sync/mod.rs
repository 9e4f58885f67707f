//! # Sync Engine
//!
//! Drains the action queue into atomic remote batches and rebuilds local
//! state from remote snapshots plus the still-pending queue.
//!
//! ## Guarantees
//!
//! - **Batched**: one flush sends the whole queue as a single
//!   all-or-nothing `execute_batch` call.
//! - **Failure keeps the queue**: a failed batch restores every drained
//!   action, so nothing is lost and the next flush retries the lot.
//! - **Single flight**: overlapping `sync()` calls collapse into one
//!   running attempt; the losing caller returns immediately.
//! - **Replay on load**: a fresh session lists every collection, then
//!   replays pending actions in queue order, so offline edits survive
//!   restarts and reconnects.

pub mod queue;
pub mod scheduler;


use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Collection, Dataset, PendingAction};
use crate::store::{LocalStore, RemoteStore, SNAPSHOT_KEY};
use queue::ActionQueue;

/// Flush tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Queue length that triggers an immediate flush on enqueue.
    pub flush_threshold: usize,
    /// Wall-clock period of the background scheduler.
    pub auto_sync_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            flush_threshold: 5,
            auto_sync_interval: Duration::from_secs(60),
        }
    }
}

/// Engine health snapshot for status surfaces (pending badge, sync spinner).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Default)]
struct StatusInner {
    last_synced_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Owns the queue, the remote seam and the in-flight guard for one owner's
/// data.
pub struct SyncEngine<R: RemoteStore, L: LocalStore> {
    remote: R,
    local: Arc<L>,
    queue: ActionQueue<L>,
    owner: String,
    config: SyncConfig,
    in_flight: AtomicBool,
    status: Mutex<StatusInner>,
}

impl<R: RemoteStore, L: LocalStore> SyncEngine<R, L> {
    pub fn new(remote: R, local: Arc<L>, owner: impl Into<String>, config: SyncConfig) -> Self {
        SyncEngine {
            remote,
            queue: ActionQueue::new(Arc::clone(&local)),
            local,
            owner: owner.into(),
            config,
            in_flight: AtomicBool::new(false),
            status: Mutex::new(StatusInner::default()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Buffers one action without flushing.
    pub async fn enqueue(&self, action: PendingAction) -> Result<usize> {
        self.queue.enqueue(action).await
    }

    /// Buffers one action and flushes when the queue reaches the threshold.
    /// The flush is fire-and-forget: its error is logged, never returned, so
    /// mutation paths do not fail on connectivity.
    pub async fn enqueue_and_maybe_sync(&self, action: PendingAction) -> Result<usize> {
        let len = self.queue.enqueue(action).await?;
        if len >= self.config.flush_threshold {
            log::info!("[SYNC] queue reached {len}, flushing");
            if let Err(e) = self.sync().await {
                log::warn!("[SYNC] threshold flush failed: {e:#}");
            }
        }
        Ok(len)
    }

    /// Flushes the whole queue as one atomic batch.
    ///
    /// Returns `Ok` after a successful flush and when there was nothing to
    /// do. Losing the in-flight race also returns `Ok`: the overlapping
    /// call is a silent no-op by contract.
    pub async fn sync(&self) -> Result<()> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("[SYNC] already in flight, skipping");
            return Ok(());
        }
        let result = self.flush_queue().await;
        self.in_flight.store(false, Ordering::SeqCst);
        result
    }

    async fn flush_queue(&self) -> Result<()> {
        let batch = self.queue.drain().await?;
        if batch.is_empty() {
            log::debug!("[SYNC] queue empty, nothing to flush");
            return Ok(());
        }
        log::info!("[SYNC] pushing batch of {}", batch.len());
        match self.remote.execute_batch(&batch).await {
            Ok(()) => {
                let mut status = self.status.lock().unwrap();
                status.last_synced_at = Some(Utc::now());
                status.last_error = None;
                Ok(())
            }
            Err(e) => {
                log::warn!("[SYNC] batch failed, keeping queue: {e:#}");
                self.status.lock().unwrap().last_error = Some(format!("{e:#}"));
                let count = batch.len();
                if let Err(restore_err) = self.queue.restore(batch).await {
                    log::error!(
                        "[SYNC] could not restore {count} drained actions: {restore_err:#}"
                    );
                }
                Err(e)
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.pending_count().await
    }

    pub fn status(&self) -> SyncStatus {
        let inner = self.status.lock().unwrap();
        SyncStatus {
            is_syncing: self.in_flight.load(Ordering::SeqCst),
            last_synced_at: inner.last_synced_at,
            last_error: inner.last_error.clone(),
        }
    }

    /// Rebuilds the dataset from the authoritative remote snapshot, replays
    /// the still-pending queue on top, and caches the result locally
    /// (best-effort).
    pub async fn load_from_remote(&self) -> Result<Dataset> {
        let mut dataset = Dataset::default();
        for collection in Collection::ALL {
            let path = collection.path(&self.owner);
            let docs = self
                .remote
                .list_collection(&path)
                .await
                .with_context(|| format!("list {path}"))?;
            log::debug!("[REPLAY] {} documents in {path}", docs.len());
            dataset.ingest(collection, docs);
        }
        self.replay_pending(&mut dataset).await;
        self.cache_dataset(&dataset).await;
        Ok(dataset)
    }

    /// Rebuilds the dataset from the cached local snapshot, for offline
    /// starts. A missing or corrupt cache degrades to an empty dataset.
    pub async fn load_from_cache(&self) -> Dataset {
        let mut dataset = match self.local.get(SNAPSHOT_KEY).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(dataset) => dataset,
                Err(e) => {
                    log::warn!("[REPLAY] cached snapshot undecodable: {e}");
                    Dataset::default()
                }
            },
            Ok(None) => Dataset::default(),
            Err(e) => {
                log::warn!("[REPLAY] cached snapshot unreadable: {e:#}");
                Dataset::default()
            }
        };
        self.replay_pending(&mut dataset).await;
        dataset
    }

    async fn replay_pending(&self, dataset: &mut Dataset) {
        let pending = self.queue.pending().await;
        if pending.is_empty() {
            return;
        }
        log::info!("[REPLAY] replaying {} pending actions", pending.len());
        for action in &pending {
            dataset.apply(action);
        }
    }

    /// Best-effort snapshot cache write; a broken local store must not take
    /// down a successful load.
    pub(crate) async fn cache_dataset(&self, dataset: &Dataset) {
        let value = match serde_json::to_value(dataset) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[REPLAY] snapshot failed to encode: {e}");
                return;
            }
        };
        if let Err(e) = self.local.set(SNAPSHOT_KEY, value).await {
            log::warn!("[REPLAY] snapshot cache write failed: {e:#}");
        }
    }
}
