//! Key-value seam to platform-local storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Reserved key holding the serialized dataset snapshot.
pub const SNAPSHOT_KEY: &str = "data-snapshot";
/// Reserved key holding the pending action queue.
pub const QUEUE_KEY: &str = "pending-actions";

/// Closure applied under the store's write lock by [`LocalStore::update`].
pub type UpdateFn = Box<dyn FnOnce(Option<Value>) -> Value + Send>;

/// Minimal async surface the subsystem needs from durable local storage.
/// `update` must be atomic with respect to every other call on the store;
/// the queue relies on it for read-modify-write compaction.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    /// Atomic read-modify-write. Returns the value that was stored.
    async fn update(&self, key: &str, apply: UpdateFn) -> Result<Value>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// In-memory local store backing tests and the demo binary. `fail_writes`
/// simulates a broken storage layer for degrade-path tests.
#[derive(Default)]
pub struct MemoryLocalStore {
    entries: Mutex<HashMap<String, Value>>,
    fail_writes: AtomicBool,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("local store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn update(&self, key: &str, apply: UpdateFn) -> Result<Value> {
        self.check_writable()?;
        let mut entries = self.entries.lock().unwrap();
        let current = entries.get(key).cloned();
        let next = apply(current);
        entries.insert(key.to_string(), next.clone());
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn update_applies_over_the_current_value() {
        let store = MemoryLocalStore::new();
        store.set("counter", json!(1)).await.unwrap();
        let next = store
            .update(
                "counter",
                Box::new(|current| {
                    let n = current.and_then(|v| v.as_i64()).unwrap_or(0);
                    json!(n + 1)
                }),
            )
            .await
            .unwrap();
        assert_eq!(next, json!(2));
        assert_eq!(store.get("counter").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn update_sees_none_for_missing_keys() {
        let store = MemoryLocalStore::new();
        let next = store
            .update(
                "absent",
                Box::new(|current| {
                    assert!(current.is_none());
                    json!([])
                }),
            )
            .await
            .unwrap();
        assert_eq!(next, json!([]));
    }

    #[tokio::test]
    async fn failed_writes_leave_reads_working() {
        let store = MemoryLocalStore::new();
        store.set("k", json!("v")).await.unwrap();
        store.set_fail_writes(true);
        assert!(store.set("k", json!("w")).await.is_err());
        assert!(store.update("k", Box::new(|_| json!("w"))).await.is_err());
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn delete_and_clear_remove_entries() {
        let store = MemoryLocalStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();
        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.clear().await.unwrap();
        assert_eq!(store.get("b").await.unwrap(), None);
    }
}
