//! Optimistic mutation surface over the reconciled dataset.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use uuid::Uuid;

use crate::insights::{month_report, MonthReport};
use crate::model::{
    split_record, Account, BalanceSnapshot, Category, Collection, Dataset, FieldValue, Fields,
    PendingAction, Record, RecurringRule, Transaction, TxStatus, SETTINGS_DOC_ID,
};
use crate::projection::{project_month, MonthEvent};
use crate::store::{LocalStore, RemoteStore};
use crate::sync::SyncEngine;

/// One owner's reconciled data plus the sync pipeline feeding the remote
/// store.
///
/// Every mutation applies optimistically in memory first, refreshes the
/// local snapshot cache, then enqueues the matching remote action. A queue
/// persistence failure degrades to memory-only state with a warning; it
/// never fails the caller.
pub struct Ledger<R: RemoteStore, L: LocalStore> {
    engine: Arc<SyncEngine<R, L>>,
    dataset: Dataset,
}

impl<R: RemoteStore, L: LocalStore> Ledger<R, L> {
    /// Loads the reconciled dataset from the remote snapshot plus the
    /// pending queue.
    pub async fn load(engine: Arc<SyncEngine<R, L>>) -> Result<Self> {
        let dataset = engine.load_from_remote().await?;
        Ok(Ledger { engine, dataset })
    }

    /// Builds the ledger from the cached snapshot, for offline starts.
    pub async fn offline(engine: Arc<SyncEngine<R, L>>) -> Self {
        let dataset = engine.load_from_cache().await;
        Ledger { engine, dataset }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn engine(&self) -> &Arc<SyncEngine<R, L>> {
        &self.engine
    }

    pub async fn pending_count(&self) -> usize {
        self.engine.pending_count().await
    }

    /// Explicit user-triggered flush; awaited, error surfaced.
    pub async fn sync_now(&self) -> Result<()> {
        self.engine.sync().await
    }

    // --- Mutations ---

    pub async fn add_account(&mut self, account: Account) -> Result<()> {
        self.submit_create(Collection::Accounts, &account).await
    }

    pub async fn update_account(&mut self, id: &str, patch: Fields) -> Result<()> {
        self.submit_update(Collection::Accounts, id, patch).await
    }

    pub async fn remove_account(&mut self, id: &str) -> Result<()> {
        self.submit_delete(Collection::Accounts, id).await
    }

    pub async fn add_snapshot(&mut self, snapshot: BalanceSnapshot) -> Result<()> {
        self.submit_create(Collection::Snapshots, &snapshot).await
    }

    pub async fn update_snapshot(&mut self, id: &str, patch: Fields) -> Result<()> {
        self.submit_update(Collection::Snapshots, id, patch).await
    }

    pub async fn remove_snapshot(&mut self, id: &str) -> Result<()> {
        self.submit_delete(Collection::Snapshots, id).await
    }

    pub async fn add_category(&mut self, category: Category) -> Result<()> {
        self.submit_create(Collection::Categories, &category).await
    }

    pub async fn update_category(&mut self, id: &str, patch: Fields) -> Result<()> {
        self.submit_update(Collection::Categories, id, patch).await
    }

    pub async fn remove_category(&mut self, id: &str) -> Result<()> {
        self.submit_delete(Collection::Categories, id).await
    }

    pub async fn add_transaction(&mut self, tx: Transaction) -> Result<()> {
        self.submit_create(Collection::Transactions, &tx).await
    }

    pub async fn update_transaction(&mut self, id: &str, patch: Fields) -> Result<()> {
        self.submit_update(Collection::Transactions, id, patch).await
    }

    pub async fn remove_transaction(&mut self, id: &str) -> Result<()> {
        self.submit_delete(Collection::Transactions, id).await
    }

    pub async fn add_rule(&mut self, rule: RecurringRule) -> Result<()> {
        self.submit_create(Collection::FixedItems, &rule).await
    }

    pub async fn update_rule(&mut self, id: &str, patch: Fields) -> Result<()> {
        self.submit_update(Collection::FixedItems, id, patch).await
    }

    /// Rules are only ever deleted by an explicit user action, never as a
    /// side effect of confirmations or skips.
    pub async fn remove_rule(&mut self, id: &str) -> Result<()> {
        self.submit_delete(Collection::FixedItems, id).await
    }

    /// Merges a patch into the settings singleton.
    ///
    /// The queued action is a create carrying the whole merged document, not
    /// the bare patch: remote updates to an absent document are dropped, and
    /// nothing guarantees the settings doc exists before the first edit.
    /// Creates upsert remotely, merge into the singleton on replay, and
    /// repeated edits still coalesce to one queued entry.
    pub async fn update_settings(&mut self, patch: Fields) -> Result<()> {
        let merged = Fields::from_record(&self.dataset.settings)?.merged_with(&patch);
        self.submit(PendingAction::create(
            Collection::Settings.path(self.engine.owner()),
            SETTINGS_DOC_ID,
            merged,
        ))
        .await;
        Ok(())
    }

    /// Converts one projected occurrence into a stored transaction and adds
    /// the skip marker in the same breath: the projection for that day
    /// disappears in favor of the transaction, and stays gone on replay.
    ///
    /// `amount` overrides the rule's nominal amount (variable-amount rules
    /// pass the real figure here).
    pub async fn confirm_occurrence(
        &mut self,
        rule_id: &str,
        date: NaiveDate,
        amount: Option<f64>,
    ) -> Result<Transaction> {
        let rule = self
            .dataset
            .rule(rule_id)
            .ok_or_else(|| anyhow!("unknown recurring rule {rule_id}"))?
            .clone();

        let tx = Transaction {
            id: Uuid::new_v4().to_string(),
            title: rule.title.clone(),
            amount: amount.unwrap_or(rule.amount),
            kind: rule.kind,
            category_id: rule.category_id.clone(),
            date,
            status: Some(TxStatus::Confirmed),
            is_paid: None,
            recurring_transaction_id: Some(rule.id.clone()),
        };
        self.add_transaction(tx.clone()).await?;

        let mut skipped = rule.skipped_dates.clone();
        skipped.insert(date);
        let mut patch = Fields::new();
        // the whole set, since a shallow merge replaces the key wholesale
        patch.insert(
            "skippedDates",
            FieldValue::from(serde_json::to_value(&skipped).context("serialize skip set")?),
        );
        self.update_rule(rule_id, patch).await?;

        log::info!("[LEDGER] confirmed {rule_id} on {date} as {}", tx.id);
        Ok(tx)
    }

    // --- Projection & insights ---

    /// Materialized events for the month containing `month`.
    pub fn month_events(&self, month: NaiveDate) -> Vec<MonthEvent> {
        project_month(month, &self.dataset.fixed_items, &self.dataset.transactions)
    }

    /// Rule-based trend report for the month containing `month`.
    pub fn month_report(&self, month: NaiveDate) -> MonthReport {
        let events = self.month_events(month);
        month_report(month, &events, &self.dataset.transactions)
    }

    // --- Internals ---

    async fn submit_create<T: Record>(&mut self, collection: Collection, record: &T) -> Result<()> {
        let (id, fields) = split_record(record)?;
        self.submit(PendingAction::create(
            collection.path(self.engine.owner()),
            id,
            fields,
        ))
        .await;
        Ok(())
    }

    async fn submit_update(
        &mut self,
        collection: Collection,
        id: &str,
        patch: Fields,
    ) -> Result<()> {
        self.submit(PendingAction::update(
            collection.path(self.engine.owner()),
            id,
            patch,
        ))
        .await;
        Ok(())
    }

    async fn submit_delete(&mut self, collection: Collection, id: &str) -> Result<()> {
        self.submit(PendingAction::delete(
            collection.path(self.engine.owner()),
            id,
        ))
        .await;
        Ok(())
    }

    /// Optimistic apply, snapshot refresh, then enqueue. The two steps are
    /// sequential; a crash between them loses at most the queued action,
    /// never the visible state.
    async fn submit(&mut self, action: PendingAction) {
        self.dataset.apply(&action);
        self.engine.cache_dataset(&self.dataset).await;
        if let Err(e) = self.engine.enqueue_and_maybe_sync(action).await {
            log::warn!("[LEDGER] queue write failed, change kept in memory only: {e:#}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Frequency;
    use crate::store::{MemoryLocalStore, MemoryRemoteStore};
    use crate::sync::SyncConfig;
    use std::collections::BTreeSet;

    type TestLedger = Ledger<Arc<MemoryRemoteStore>, MemoryLocalStore>;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn open_ledger() -> (Arc<MemoryRemoteStore>, Arc<MemoryLocalStore>, TestLedger) {
        let remote = Arc::new(MemoryRemoteStore::new());
        let local = Arc::new(MemoryLocalStore::new());
        let config = SyncConfig {
            flush_threshold: 100,
            ..SyncConfig::default()
        };
        let engine = Arc::new(SyncEngine::new(
            Arc::clone(&remote),
            Arc::clone(&local),
            "alice",
            config,
        ));
        let ledger = Ledger::load(engine).await.unwrap();
        (remote, local, ledger)
    }

    fn rent_rule() -> RecurringRule {
        RecurringRule {
            id: "r1".to_string(),
            title: "Rent".to_string(),
            amount: 900.0,
            kind: crate::model::FlowKind::Expense,
            category_id: Some("housing".to_string()),
            frequency: Frequency::Monthly,
            start_date: date("2024-01-05"),
            end_date: None,
            is_variable: false,
            skipped_dates: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn mutations_are_visible_before_any_sync() {
        let (remote, _local, mut ledger) = open_ledger().await;
        ledger
            .add_account(Account {
                id: "a1".to_string(),
                name: "Checking".to_string(),
                currency: "USD".to_string(),
                archived: false,
            })
            .await
            .unwrap();

        assert_eq!(ledger.dataset().accounts.len(), 1);
        assert_eq!(ledger.pending_count().await, 1);
        assert_eq!(remote.batches_executed(), 0);
    }

    #[tokio::test]
    async fn confirmation_round_trips_through_the_remote_store() {
        let (_remote, _local, mut ledger) = open_ledger().await;
        ledger.add_rule(rent_rule()).await.unwrap();

        let month = date("2024-03-01");
        let projected = ledger.month_events(month);
        assert_eq!(projected.len(), 1);
        assert!(projected[0].is_projected());
        assert_eq!(projected[0].date, date("2024-03-05"));

        let tx = ledger
            .confirm_occurrence("r1", date("2024-03-05"), Some(920.0))
            .await
            .unwrap();

        // locally: one confirmed event, no projection, skip marker in place
        let confirmed = ledger.month_events(month);
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].id, tx.id);
        assert_eq!(confirmed[0].amount, 920.0);
        assert_eq!(confirmed[0].status, TxStatus::Confirmed);
        assert!(ledger
            .dataset()
            .rule("r1")
            .unwrap()
            .skipped_dates
            .contains(&date("2024-03-05")));

        // flush and rebuild from the remote snapshot: same picture
        ledger.sync_now().await.unwrap();
        let reloaded = Ledger::load(Arc::clone(ledger.engine())).await.unwrap();
        let replayed = reloaded.month_events(month);
        assert_eq!(replayed.len(), 1);
        assert_eq!(replayed[0].id, tx.id);
        assert_eq!(replayed[0].status, TxStatus::Confirmed);
    }

    #[tokio::test]
    async fn deleting_confirmation_and_skip_restores_the_projection() {
        let (_remote, _local, mut ledger) = open_ledger().await;
        ledger.add_rule(rent_rule()).await.unwrap();
        let month = date("2024-03-01");
        let baseline = ledger.month_events(month);

        let tx = ledger
            .confirm_occurrence("r1", date("2024-03-05"), None)
            .await
            .unwrap();
        ledger.remove_transaction(&tx.id).await.unwrap();
        let mut patch = Fields::new();
        patch.insert(
            "skippedDates",
            FieldValue::from(serde_json::json!([])),
        );
        ledger.update_rule("r1", patch).await.unwrap();

        assert_eq!(ledger.month_events(month), baseline);
    }

    #[tokio::test]
    async fn settings_patch_merges_into_the_singleton() {
        let (_remote, _local, mut ledger) = open_ledger().await;
        let mut patch = Fields::new();
        patch.insert("defaultCurrency", FieldValue::Text("EUR".to_string()));
        ledger.update_settings(patch).await.unwrap();

        assert_eq!(ledger.dataset().settings.default_currency, "EUR");
        assert!(ledger.dataset().settings.show_projected);
    }

    #[tokio::test]
    async fn settings_change_survives_sync_and_reload() {
        // no settings document exists remotely before the first edit
        let (remote, _local, mut ledger) = open_ledger().await;
        let mut patch = Fields::new();
        patch.insert("defaultCurrency", FieldValue::Text("EUR".to_string()));
        ledger.update_settings(patch).await.unwrap();

        ledger.sync_now().await.unwrap();
        assert_eq!(ledger.pending_count().await, 0);
        let path = Collection::Settings.path("alice");
        assert_eq!(remote.dump(&path).len(), 1);

        let reloaded = Ledger::load(Arc::clone(ledger.engine())).await.unwrap();
        assert_eq!(reloaded.dataset().settings.default_currency, "EUR");
        assert!(reloaded.dataset().settings.show_projected);
    }

    #[tokio::test]
    async fn offline_start_serves_the_cached_snapshot() {
        let (remote, _local, mut ledger) = open_ledger().await;
        ledger.add_rule(rent_rule()).await.unwrap();
        ledger.sync_now().await.unwrap();

        remote.set_offline(true);
        assert!(Ledger::load(Arc::clone(ledger.engine())).await.is_err());

        let offline = Ledger::offline(Arc::clone(ledger.engine())).await;
        assert_eq!(offline.dataset().fixed_items.len(), 1);
        assert_eq!(offline.month_events(date("2024-03-01")).len(), 1);
    }

    #[tokio::test]
    async fn broken_local_store_degrades_to_memory_only() {
        let (_remote, local, mut ledger) = open_ledger().await;
        local.set_fail_writes(true);

        ledger
            .add_category(Category {
                id: "c1".to_string(),
                name: "Groceries".to_string(),
            })
            .await
            .unwrap();

        // visible in memory, nothing durably queued
        assert_eq!(ledger.dataset().categories.len(), 1);
        assert_eq!(ledger.pending_count().await, 0);
    }
}
