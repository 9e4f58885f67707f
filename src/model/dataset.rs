//! Reconciled in-memory state: the remote snapshot with the pending local
//! queue replayed on top.

use serde::{Deserialize, Serialize};

use crate::model::action::{ActionOp, FieldValue, Fields, PendingAction};
use crate::model::entities::{
    Account, BalanceSnapshot, Category, Collection, Record, RecurringRule, Settings, Transaction,
};

/// The full application dataset for one owner. Serializable as-is under the
/// reserved local snapshot key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Dataset {
    pub accounts: Vec<Account>,
    pub snapshots: Vec<BalanceSnapshot>,
    pub fixed_items: Vec<RecurringRule>,
    pub transactions: Vec<Transaction>,
    pub categories: Vec<Category>,
    pub settings: Settings,
}

impl Dataset {
    /// Replaces one collection's contents with freshly listed remote
    /// documents. Undecodable documents are skipped, not fatal.
    pub fn ingest(&mut self, collection: Collection, docs: Vec<Fields>) {
        match collection {
            Collection::Accounts => self.accounts = decode_list(collection, docs),
            Collection::Snapshots => self.snapshots = decode_list(collection, docs),
            Collection::FixedItems => self.fixed_items = decode_list(collection, docs),
            Collection::Transactions => self.transactions = decode_list(collection, docs),
            Collection::Categories => self.categories = decode_list(collection, docs),
            Collection::Settings => {
                let merged = docs
                    .into_iter()
                    .fold(Fields::new(), |acc, doc| acc.merged_with(&doc));
                match merged.into_record() {
                    Ok(settings) => self.settings = settings,
                    Err(e) => {
                        log::warn!("[REPLAY] settings document undecodable, using defaults: {e:#}");
                        self.settings = Settings::default();
                    }
                }
            }
        }
    }

    /// Applies one queued action. The same routine backs optimistic local
    /// mutations and queue replay, so a replayed session converges on the
    /// state the user last saw.
    pub fn apply(&mut self, action: &PendingAction) {
        let Some(collection) = Collection::from_path(&action.collection) else {
            log::warn!(
                "[REPLAY] ignoring action for unknown collection {}",
                action.collection
            );
            return;
        };
        match collection {
            Collection::Accounts => apply_to_list(&mut self.accounts, &action.op),
            Collection::Snapshots => apply_to_list(&mut self.snapshots, &action.op),
            Collection::FixedItems => apply_to_list(&mut self.fixed_items, &action.op),
            Collection::Transactions => apply_to_list(&mut self.transactions, &action.op),
            Collection::Categories => apply_to_list(&mut self.categories, &action.op),
            Collection::Settings => self.apply_settings(&action.op),
        }
    }

    /// Settings is a singleton: creates and updates both merge into the one
    /// object, a delete resets it to defaults.
    fn apply_settings(&mut self, op: &ActionOp) {
        match op {
            ActionOp::Create { fields, .. } | ActionOp::Update { fields, .. } => {
                let merged = match Fields::from_record(&self.settings) {
                    Ok(current) => current.merged_with(fields),
                    Err(_) => fields.clone(),
                };
                match merged.into_record() {
                    Ok(settings) => self.settings = settings,
                    Err(e) => log::warn!("[REPLAY] keeping settings unpatched: {e:#}"),
                }
            }
            ActionOp::Delete { .. } => self.settings = Settings::default(),
        }
    }

    pub fn transaction(&self, id: &str) -> Option<&Transaction> {
        self.transactions.iter().find(|t| t.id == id)
    }

    pub fn rule(&self, id: &str) -> Option<&RecurringRule> {
        self.fixed_items.iter().find(|r| r.id == id)
    }

    pub fn category_name(&self, id: &str) -> Option<&str> {
        self.categories
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
    }
}

/// Idempotent replay semantics: creates skip existing ids, updates patch
/// only an existing record, deletes remove at most one record.
fn apply_to_list<T: Record>(list: &mut Vec<T>, op: &ActionOp) {
    match op {
        ActionOp::Create { id, fields } => {
            if list.iter().any(|r| r.record_id() == id) {
                return;
            }
            let mut doc = fields.clone();
            doc.insert("id", FieldValue::Text(id.clone()));
            match doc.into_record::<T>() {
                Ok(record) => list.push(record),
                Err(e) => log::warn!("[REPLAY] dropping undecodable create for {id}: {e:#}"),
            }
        }
        ActionOp::Update { id, fields } => {
            let Some(index) = list.iter().position(|r| r.record_id() == id) else {
                return;
            };
            let patched = Fields::from_record(&list[index])
                .and_then(|current| current.merged_with(fields).into_record::<T>());
            match patched {
                Ok(record) => list[index] = record,
                Err(e) => log::warn!("[REPLAY] keeping {id} unpatched: {e:#}"),
            }
        }
        ActionOp::Delete { id } => list.retain(|r| r.record_id() != id),
    }
}

fn decode_list<T: Record>(collection: Collection, docs: Vec<Fields>) -> Vec<T> {
    let mut out = Vec::with_capacity(docs.len());
    for doc in docs {
        match doc.into_record::<T>() {
            Ok(record) => out.push(record),
            Err(e) => log::warn!(
                "[REPLAY] skipping undecodable {} document: {e:#}",
                collection.wire_name()
            ),
        }
    }
    out
}
