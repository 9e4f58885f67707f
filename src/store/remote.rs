//! Remote document-store seam and the in-memory twin used by tests and the
//! demo binary.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::model::{ActionOp, FieldValue, Fields, PendingAction};

/// Write/read surface of the remote document store. `execute_batch` is
/// atomic: either every action in the batch lands or none do.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn execute_batch(&self, batch: &[PendingAction]) -> Result<()>;
    /// Full documents (including their ids) under one collection path.
    async fn list_collection(&self, path: &str) -> Result<Vec<Fields>>;
}

#[async_trait]
impl<T: RemoteStore> RemoteStore for std::sync::Arc<T> {
    async fn execute_batch(&self, batch: &[PendingAction]) -> Result<()> {
        self.as_ref().execute_batch(batch).await
    }

    async fn list_collection(&self, path: &str) -> Result<Vec<Fields>> {
        self.as_ref().list_collection(path).await
    }
}

/// In-memory remote store: per-path document maps keyed by id. The offline
/// flag fails batches before any document is touched, and the optional batch
/// latency keeps a sync in flight long enough for overlap tests.
#[derive(Default)]
pub struct MemoryRemoteStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Fields>>>,
    offline: AtomicBool,
    batch_latency: Mutex<Option<Duration>>,
    batches_executed: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_batch_latency(&self, latency: Duration) {
        *self.batch_latency.lock().unwrap() = Some(latency);
    }

    pub fn batches_executed(&self) -> usize {
        self.batches_executed.load(Ordering::SeqCst)
    }

    /// Current documents under one path, keyed by id.
    pub fn dump(&self, path: &str) -> BTreeMap<String, Fields> {
        self.collections
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn execute_batch(&self, batch: &[PendingAction]) -> Result<()> {
        let latency = *self.batch_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            bail!("remote store unreachable");
        }
        let mut collections = self.collections.lock().unwrap();
        for action in batch {
            let docs = collections.entry(action.collection.clone()).or_default();
            match &action.op {
                ActionOp::Create { id, fields } => {
                    let mut doc = fields.clone();
                    doc.insert("id", FieldValue::Text(id.clone()));
                    docs.insert(id.clone(), doc);
                }
                // Updates to absent documents are no-ops, mirroring replay
                // semantics on the client side.
                ActionOp::Update { id, fields } => {
                    if let Some(existing) = docs.get(id) {
                        let merged = existing.merged_with(fields);
                        docs.insert(id.clone(), merged);
                    }
                }
                ActionOp::Delete { id } => {
                    docs.remove(id);
                }
            }
        }
        self.batches_executed.fetch_add(1, Ordering::SeqCst);
        log::debug!("[REMOTE] applied batch of {}", batch.len());
        Ok(())
    }

    async fn list_collection(&self, path: &str) -> Result<Vec<Fields>> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("remote store unreachable");
        }
        Ok(self
            .collections
            .lock()
            .unwrap()
            .get(path)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }
}
