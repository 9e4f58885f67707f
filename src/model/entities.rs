//! Typed records for the six logical collections.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// The logical collections, in the names they carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Accounts,
    Snapshots,
    FixedItems,
    Transactions,
    Categories,
    Settings,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Accounts,
        Collection::Snapshots,
        Collection::FixedItems,
        Collection::Transactions,
        Collection::Categories,
        Collection::Settings,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::Snapshots => "snapshots",
            Collection::FixedItems => "fixedItems",
            Collection::Transactions => "transactions",
            Collection::Categories => "categories",
            Collection::Settings => "settings",
        }
    }

    /// Remote path for one owner's copy of this collection.
    pub fn path(self, owner: &str) -> String {
        format!("owners/{owner}/{}", self.wire_name())
    }

    /// Maps a collection path back to the logical collection (the last path
    /// segment carries the wire name).
    pub fn from_path(path: &str) -> Option<Collection> {
        match path.rsplit('/').next() {
            Some("accounts") => Some(Collection::Accounts),
            Some("snapshots") => Some(Collection::Snapshots),
            Some("fixedItems") => Some(Collection::FixedItems),
            Some("transactions") => Some(Collection::Transactions),
            Some("categories") => Some(Collection::Categories),
            Some("settings") => Some(Collection::Settings),
            _ => None,
        }
    }
}

/// A document stored in a list collection.
pub trait Record: Serialize + DeserializeOwned + Clone {
    fn record_id(&self) -> &str;
}

/// Splits a record into its id and the remaining document fields, the shape
/// create actions carry (the id rides on the action, not in the payload).
pub fn split_record<T: Record>(record: &T) -> anyhow::Result<(String, crate::model::Fields)> {
    let mut fields = crate::model::Fields::from_record(record)?;
    fields.remove("id");
    Ok((record.record_id().to_string(), fields))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowKind {
    Income,
    Expense,
}

/// Transaction lifecycle state. `PAID` is the legacy spelling of confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    #[serde(alias = "PAID")]
    Confirmed,
    Projected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
    LastBusinessDayOfMonth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSnapshot {
    pub id: String,
    pub account_id: String,
    pub date: NaiveDate,
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub title: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: FlowKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TxStatus>,
    /// Legacy flag predating `status`; consulted only when `status` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_paid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_transaction_id: Option<String>,
}

impl Transaction {
    /// Collapses stored shapes to one of the two statuses: anything not
    /// explicitly unconfirmed counts as CONFIRMED.
    pub fn normalized_status(&self) -> TxStatus {
        match (self.status, self.is_paid) {
            (Some(status), _) => status,
            (None, Some(false)) => TxStatus::Projected,
            (None, _) => TxStatus::Confirmed,
        }
    }
}

/// A recurring income/expense rule ("fixed item" on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringRule {
    pub id: String,
    pub title: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: FlowKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub frequency: Frequency,
    pub start_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    /// Variable-amount rules project with the nominal amount and take the
    /// real one at confirmation time.
    #[serde(default)]
    pub is_variable: bool,
    /// Dates this rule must not project: user skips plus confirmed
    /// occurrences.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped_dates: BTreeSet<NaiveDate>,
}

/// Document id the settings singleton is stored under. Fixed so that
/// settings updates coalesce in the queue like any other target.
pub const SETTINGS_DOC_ID: &str = "preferences";

/// Per-owner preferences. A logical singleton, not a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub default_currency: String,
    pub show_projected: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            default_currency: "USD".to_string(),
            show_projected: true,
        }
    }
}

impl Record for Account {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for BalanceSnapshot {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Category {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for Transaction {
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl Record for RecurringRule {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_paths_are_owner_scoped() {
        assert_eq!(
            Collection::FixedItems.path("alice"),
            "owners/alice/fixedItems"
        );
        assert_eq!(
            Collection::from_path("owners/alice/fixedItems"),
            Some(Collection::FixedItems)
        );
        assert_eq!(Collection::from_path("owners/alice/unknown"), None);
    }

    #[test]
    fn paid_status_normalizes_to_confirmed() {
        let tx: Transaction = serde_json::from_value(serde_json::json!({
            "id": "t1",
            "title": "Rent",
            "amount": 900.0,
            "type": "EXPENSE",
            "date": "2024-03-01",
            "status": "PAID"
        }))
        .unwrap();
        assert_eq!(tx.status, Some(TxStatus::Confirmed));
        assert_eq!(tx.normalized_status(), TxStatus::Confirmed);
    }

    #[test]
    fn missing_status_falls_back_to_legacy_flag() {
        let mut tx: Transaction = serde_json::from_value(serde_json::json!({
            "id": "t2",
            "title": "Gym",
            "amount": 30.0,
            "type": "EXPENSE",
            "date": "2024-03-05"
        }))
        .unwrap();
        assert_eq!(tx.normalized_status(), TxStatus::Confirmed);

        tx.is_paid = Some(false);
        assert_eq!(tx.normalized_status(), TxStatus::Projected);

        tx.is_paid = Some(true);
        assert_eq!(tx.normalized_status(), TxStatus::Confirmed);
    }

    #[test]
    fn frequency_wire_names_are_screaming_snake() {
        assert_eq!(
            serde_json::to_value(Frequency::LastBusinessDayOfMonth).unwrap(),
            "LAST_BUSINESS_DAY_OF_MONTH"
        );
        assert_eq!(serde_json::to_value(Frequency::Biweekly).unwrap(), "BIWEEKLY");
    }
}
