//! Persisted action queue with enqueue-time compaction.
//!
//! The queue buffers remote mutations while the app is offline or simply
//! between flushes. Compaction keeps at most one entry per
//! `(collection, target id)` pair by merging each new intent into the entry
//! already queued for the same target, so a burst of edits to one record
//! costs one remote write. Queue state lives under a single reserved key in
//! the local store and is only ever changed through the store's atomic
//! `update` primitive.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use serde_json::Value;

use crate::model::{ActionOp, PendingAction};
use crate::store::{LocalStore, QUEUE_KEY};

// ============================================================================
// Compaction (pure)
// ============================================================================

/// Outcome of coalescing an incoming action against the queued entry for
/// the same target.
#[derive(Debug, Clone, PartialEq)]
pub enum Coalesced {
    /// The queued entry becomes this action, keeping its position and its
    /// original queue timestamp.
    Replace(PendingAction),
    /// The pair cancels: a queued create followed by a delete means the
    /// remote store never needs to hear about the record at all.
    Annihilate,
}

/// Merge table for two actions aimed at the same target.
///
/// create+update folds the patch into the pending create; create+delete
/// annihilates; update+update merges patches (new keys win); update+delete
/// collapses to the delete; delete+create is a resurrection and becomes the
/// create. Creates carry the full document, so last-intent-wins is lossless
/// for the remaining pairs.
pub fn coalesce(existing: &PendingAction, incoming: PendingAction) -> Coalesced {
    let collection = existing.collection.clone();
    let queued_at = existing.queued_at;
    match (&existing.op, incoming.op) {
        (ActionOp::Create { id, fields: base }, ActionOp::Update { fields: patch, .. }) => {
            Coalesced::Replace(PendingAction {
                collection,
                op: ActionOp::Create {
                    id: id.clone(),
                    fields: base.merged_with(&patch),
                },
                queued_at,
            })
        }
        (ActionOp::Create { .. }, ActionOp::Delete { .. }) => Coalesced::Annihilate,
        (ActionOp::Update { fields: base, .. }, ActionOp::Update { id, fields: patch }) => {
            Coalesced::Replace(PendingAction {
                collection,
                op: ActionOp::Update {
                    id,
                    fields: base.merged_with(&patch),
                },
                queued_at,
            })
        }
        (_, op) => Coalesced::Replace(PendingAction {
            collection,
            op,
            queued_at,
        }),
    }
}

/// Appends one action to a queue snapshot, coalescing against an existing
/// entry for the same target. Actions without a resolvable target are
/// appended as-is, never deduplicated.
pub fn push_compacted(queue: &mut Vec<PendingAction>, action: PendingAction) {
    let position = match action.target_id() {
        Some(target) => queue.iter().position(|queued| {
            queued.collection == action.collection && queued.target_id() == Some(target)
        }),
        None => {
            queue.push(action);
            return;
        }
    };
    match position {
        Some(index) => match coalesce(&queue[index], action) {
            Coalesced::Replace(merged) => queue[index] = merged,
            Coalesced::Annihilate => {
                queue.remove(index);
            }
        },
        None => queue.push(action),
    }
}

/// Replays a whole sequence through the merge table. Idempotent: compacting
/// an already-compacted queue returns it unchanged.
pub fn compact(actions: Vec<PendingAction>) -> Vec<PendingAction> {
    let mut out = Vec::with_capacity(actions.len());
    for action in actions {
        push_compacted(&mut out, action);
    }
    out
}

// ============================================================================
// Persisted queue
// ============================================================================

/// The durable queue. Owns the reserved queue key in the local store.
pub struct ActionQueue<L: LocalStore> {
    store: Arc<L>,
}

impl<L: LocalStore> ActionQueue<L> {
    pub fn new(store: Arc<L>) -> Self {
        ActionQueue { store }
    }

    /// Coalesces `action` into the persisted queue. Returns the queue
    /// length after the write.
    pub async fn enqueue(&self, action: PendingAction) -> Result<usize> {
        log::debug!(
            "[QUEUE] enqueue {} {} in {}",
            action.op.name(),
            action.op.id(),
            action.collection
        );
        let stored = self
            .store
            .update(
                QUEUE_KEY,
                Box::new(move |current| {
                    let mut queue = decode_queue(current);
                    push_compacted(&mut queue, action);
                    encode_queue(&queue)
                }),
            )
            .await
            .context("persist action queue")?;
        Ok(stored.as_array().map(Vec::len).unwrap_or(0))
    }

    /// Atomically takes the whole queue, leaving it empty. The caller owns
    /// the drained batch until it either lands remotely or is restored.
    pub async fn drain(&self) -> Result<Vec<PendingAction>> {
        // The carry-out slot smuggles the previous value past the closure
        // boundary so take-and-clear stays one atomic read-modify-write.
        let taken: Arc<Mutex<Vec<PendingAction>>> = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::clone(&taken);
        self.store
            .update(
                QUEUE_KEY,
                Box::new(move |current| {
                    *slot.lock().unwrap() = decode_queue(current);
                    Value::Array(Vec::new())
                }),
            )
            .await
            .context("drain action queue")?;
        let drained = std::mem::take(&mut *taken.lock().unwrap());
        Ok(drained)
    }

    /// Puts an unsent batch back in front of whatever was enqueued while it
    /// was in flight, then re-compacts so the one-entry-per-target invariant
    /// holds. With no interleaved enqueues this restores the queue verbatim.
    pub async fn restore(&self, batch: Vec<PendingAction>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.store
            .update(
                QUEUE_KEY,
                Box::new(move |current| {
                    let mut combined = batch;
                    combined.extend(decode_queue(current));
                    encode_queue(&compact(combined))
                }),
            )
            .await
            .context("restore action queue")?;
        Ok(())
    }

    /// Pending actions in queue order. Read failures degrade to an empty
    /// list so callers keep working from memory.
    pub async fn pending(&self) -> Vec<PendingAction> {
        match self.store.get(QUEUE_KEY).await {
            Ok(value) => decode_queue(value),
            Err(e) => {
                log::warn!("[QUEUE] unreadable, treating as empty: {e:#}");
                Vec::new()
            }
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending().await.len()
    }
}

fn decode_queue(value: Option<Value>) -> Vec<PendingAction> {
    let Some(value) = value else {
        return Vec::new();
    };
    match serde_json::from_value(value) {
        Ok(queue) => queue,
        Err(e) => {
            log::warn!("[QUEUE] dropping corrupt queue state: {e}");
            Vec::new()
        }
    }
}

fn encode_queue(queue: &[PendingAction]) -> Value {
    serde_json::to_value(queue).unwrap_or_else(|e| {
        log::error!("[QUEUE] queue failed to encode: {e}");
        Value::Array(Vec::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldValue, Fields};
    use chrono::{TimeZone, Utc};

    const COLLECTION: &str = "owners/alice/transactions";

    fn fields(pairs: &[(&str, f64)]) -> Fields {
        let mut out = Fields::new();
        for (key, value) in pairs {
            out.insert(*key, FieldValue::Number(*value));
        }
        out
    }

    fn create(id: &str, pairs: &[(&str, f64)]) -> PendingAction {
        PendingAction::create(COLLECTION, id, fields(pairs))
    }

    fn update(id: &str, pairs: &[(&str, f64)]) -> PendingAction {
        PendingAction::update(COLLECTION, id, fields(pairs))
    }

    fn delete(id: &str) -> PendingAction {
        PendingAction::delete(COLLECTION, id)
    }

    #[test]
    fn create_then_update_stays_a_single_merged_create() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, create("t1", &[("amount", 10.0), ("day", 1.0)]));
        push_compacted(&mut queue, update("t1", &[("amount", 12.0)]));

        assert_eq!(queue.len(), 1);
        match &queue[0].op {
            ActionOp::Create { id, fields } => {
                assert_eq!(id, "t1");
                assert_eq!(fields.get("amount"), Some(&FieldValue::Number(12.0)));
                assert_eq!(fields.get("day"), Some(&FieldValue::Number(1.0)));
            }
            other => panic!("expected merged create, got {other:?}"),
        }
    }

    #[test]
    fn create_then_delete_annihilates() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, create("t1", &[("amount", 10.0)]));
        push_compacted(&mut queue, delete("t1"));
        assert!(queue.is_empty());
    }

    #[test]
    fn update_then_update_merges_with_new_keys_winning() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, update("t1", &[("amount", 10.0), ("day", 3.0)]));
        push_compacted(&mut queue, update("t1", &[("amount", 11.0)]));

        assert_eq!(queue.len(), 1);
        match &queue[0].op {
            ActionOp::Update { fields, .. } => {
                assert_eq!(fields.get("amount"), Some(&FieldValue::Number(11.0)));
                assert_eq!(fields.get("day"), Some(&FieldValue::Number(3.0)));
            }
            other => panic!("expected merged update, got {other:?}"),
        }
    }

    #[test]
    fn update_then_delete_collapses_to_delete() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, update("t1", &[("amount", 10.0)]));
        push_compacted(&mut queue, delete("t1"));

        assert_eq!(queue.len(), 1);
        assert!(matches!(queue[0].op, ActionOp::Delete { .. }));
    }

    #[test]
    fn delete_then_create_resurrects() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, delete("t1"));
        push_compacted(&mut queue, create("t1", &[("amount", 20.0)]));

        assert_eq!(queue.len(), 1);
        match &queue[0].op {
            ActionOp::Create { fields, .. } => {
                assert_eq!(fields.get("amount"), Some(&FieldValue::Number(20.0)));
            }
            other => panic!("expected create, got {other:?}"),
        }
    }

    #[test]
    fn repeated_deletes_stay_one_entry() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, delete("t1"));
        push_compacted(&mut queue, delete("t1"));
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue[0].op, ActionOp::Delete { .. }));
    }

    #[test]
    fn actions_without_target_append_without_dedup() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, update("", &[("amount", 1.0)]));
        push_compacted(&mut queue, update("", &[("amount", 2.0)]));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn same_id_in_different_collections_does_not_coalesce() {
        let mut queue = Vec::new();
        push_compacted(&mut queue, update("x1", &[("amount", 1.0)]));
        push_compacted(
            &mut queue,
            PendingAction::update("owners/alice/accounts", "x1", fields(&[("amount", 2.0)])),
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn merged_entry_keeps_position_and_first_timestamp() {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut first = update("t1", &[("amount", 1.0)]);
        first.queued_at = t0;
        let mut queue = vec![first, delete("t9")];

        push_compacted(&mut queue, update("t1", &[("amount", 2.0)]));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].op.id(), "t1");
        assert_eq!(queue[0].queued_at, t0);
        assert_eq!(queue[1].op.id(), "t9");
    }

    #[test]
    fn compaction_is_idempotent() {
        let sequence = vec![
            create("a", &[("amount", 1.0)]),
            update("a", &[("amount", 2.0)]),
            update("b", &[("amount", 5.0)]),
            delete("c"),
        ];
        let once = compact(sequence);
        let twice = compact(once.clone());
        assert_eq!(once, twice);
    }
}
