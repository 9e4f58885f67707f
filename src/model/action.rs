//! Queued mutation model: what the action queue holds and the remote batch
//! transports.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single value inside an action payload or remote document.
///
/// The document model is JSON-shaped but closed: these six cases are the only
/// shapes the queue, the remote batch and the local snapshot ever carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Map(BTreeMap<String, FieldValue>),
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(b),
            Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => FieldValue::Text(s),
            Value::Array(items) => FieldValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                FieldValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<FieldValue> for Value {
    fn from(value: FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(b),
            FieldValue::Number(n) => serde_json::Number::from_f64(n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::Text(s) => Value::String(s),
            FieldValue::List(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            FieldValue::Map(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

/// Ordered field map carried by create/update payloads and remote documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, FieldValue>);

impl Fields {
    pub fn new() -> Self {
        Fields(BTreeMap::new())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    /// Shallow merge: keys from `patch` replace keys in `self`, other keys
    /// are kept. The same primitive backs queue compaction and replay.
    pub fn merged_with(&self, patch: &Fields) -> Fields {
        let mut merged = self.0.clone();
        for (key, value) in &patch.0 {
            merged.insert(key.clone(), value.clone());
        }
        Fields(merged)
    }

    /// Serializes a typed record into its document form. Fails when the
    /// record does not serialize to an object.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Fields> {
        let value = serde_json::to_value(record).context("serialize record")?;
        match value {
            Value::Object(map) => Ok(Fields(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            )),
            other => bail!("record is not an object: {other}"),
        }
    }

    pub fn into_record<T: DeserializeOwned>(self) -> Result<T> {
        serde_json::from_value(self.to_value()).context("deserialize record")
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), v.clone().into()))
                .collect(),
        )
    }
}

impl FromIterator<(String, FieldValue)> for Fields {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Fields(iter.into_iter().collect())
    }
}

/// The three remote mutations. Creates carry the full document, updates a
/// partial patch, deletes only the target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ActionOp {
    Create { id: String, fields: Fields },
    Update { id: String, fields: Fields },
    Delete { id: String },
}

impl ActionOp {
    pub fn id(&self) -> &str {
        match self {
            ActionOp::Create { id, .. } | ActionOp::Update { id, .. } | ActionOp::Delete { id } => {
                id
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionOp::Create { .. } => "create",
            ActionOp::Update { .. } => "update",
            ActionOp::Delete { .. } => "delete",
        }
    }
}

/// One buffered remote mutation, keyed for compaction by collection path plus
/// target id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Owner-scoped collection path, e.g. `owners/alice/transactions`.
    pub collection: String,
    #[serde(flatten)]
    pub op: ActionOp,
    /// When the intent was first queued. Diagnostic only.
    pub queued_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn create(collection: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        PendingAction {
            collection: collection.into(),
            op: ActionOp::Create {
                id: id.into(),
                fields,
            },
            queued_at: Utc::now(),
        }
    }

    pub fn update(collection: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        PendingAction {
            collection: collection.into(),
            op: ActionOp::Update {
                id: id.into(),
                fields,
            },
            queued_at: Utc::now(),
        }
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        PendingAction {
            collection: collection.into(),
            op: ActionOp::Delete { id: id.into() },
            queued_at: Utc::now(),
        }
    }

    /// Compaction key within the collection. `None` when the id is empty,
    /// in which case the action is appended without deduplication.
    pub fn target_id(&self) -> Option<&str> {
        let id = self.op.id();
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }
}
