use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use clap::Parser;
use uuid::Uuid;

use ledgerline::model::{
    split_record, Category, Collection, Dataset, FlowKind, Frequency, RecurringRule, Transaction,
    TxStatus,
};
use ledgerline::{
    AutoSync, FieldValue, Fields, Ledger, MemoryLocalStore, MemoryRemoteStore, MonthEvent,
    MonthReport, PendingAction, RemoteStore, SyncConfig, SyncEngine,
};

/// Demo session against an in-memory remote: seeds an account's history,
/// queues edits offline, flushes, confirms a projected occurrence, then
/// prints the month calendar and its outlook.
#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Owner whose collections the session reads and writes.
    #[arg(long, default_value = "demo")]
    owner: String,

    /// Month to project, as YYYY-MM.
    #[arg(long, default_value = "2024-03")]
    month: String,

    /// Queue length that triggers an automatic flush.
    #[arg(long, default_value_t = 5)]
    flush_threshold: usize,

    /// Take the remote offline for the first flush to show the queue
    /// surviving a failed batch.
    #[arg(long)]
    simulate_outage: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let month = parse_month(&args.month)?;

    println!("[MAIN] LedgerLine demo session");
    println!(
        "[MAIN] Owner: {} | Month: {} | Flush threshold: {}",
        args.owner,
        month.format("%B %Y"),
        args.flush_threshold
    );

    let remote = Arc::new(MemoryRemoteStore::new());
    seed_remote(&remote, &args.owner).await?;

    let local = Arc::new(MemoryLocalStore::new());
    let config = SyncConfig {
        flush_threshold: args.flush_threshold,
        ..SyncConfig::default()
    };
    let engine = Arc::new(SyncEngine::new(
        Arc::clone(&remote),
        local,
        args.owner.clone(),
        config,
    ));

    let mut ledger = Ledger::load(Arc::clone(&engine)).await?;
    println!(
        "[MAIN] Loaded {} transactions, {} recurring rules, {} categories",
        ledger.dataset().transactions.len(),
        ledger.dataset().fixed_items.len(),
        ledger.dataset().categories.len()
    );

    // Background flush on the configured cadence for the session's lifetime.
    let mut auto_sync = AutoSync::new();
    auto_sync.start(Arc::clone(&engine), engine.config().auto_sync_interval);

    // Three edits to one transaction coalesce into a single queued create,
    // plus one settings patch.
    println!();
    println!("[QUEUE] Recording edits locally...");
    let coffee_id = Uuid::new_v4().to_string();
    ledger
        .add_transaction(Transaction {
            id: coffee_id.clone(),
            title: "Coffee beans".to_string(),
            amount: 4.50,
            kind: FlowKind::Expense,
            category_id: Some("food".to_string()),
            date: month + Days::new(3),
            status: Some(TxStatus::Confirmed),
            is_paid: None,
            recurring_transaction_id: None,
        })
        .await?;
    ledger
        .update_transaction(&coffee_id, amount_patch(5.10))
        .await?;
    ledger
        .update_transaction(&coffee_id, amount_patch(5.25))
        .await?;
    let mut prefs = Fields::new();
    prefs.insert("defaultCurrency", FieldValue::Text("EUR".to_string()));
    ledger.update_settings(prefs).await?;
    println!(
        "[QUEUE] 4 edits compacted into {} pending action(s)",
        ledger.pending_count().await
    );

    if args.simulate_outage {
        println!("[QUEUE] Dropping the connection before the first flush...");
        remote.set_offline(true);
        match ledger.sync_now().await {
            Ok(()) => println!("[QUEUE] Flush unexpectedly succeeded"),
            Err(e) => println!(
                "[QUEUE] Flush failed ({e:#}), {} action(s) kept for retry",
                ledger.pending_count().await
            ),
        }
        remote.set_offline(false);
    }

    println!(
        "[SYNC] Flushing {} pending action(s)...",
        ledger.pending_count().await
    );
    ledger.sync_now().await?;
    println!(
        "[SYNC] Queue drained, remote batches executed: {}",
        remote.batches_executed()
    );

    // Confirm the month's first projected occurrence at its nominal amount.
    if let Some(event) = ledger
        .month_events(month)
        .into_iter()
        .find(MonthEvent::is_projected)
    {
        let rule_id = event
            .recurring_id
            .clone()
            .context("projected events carry their rule id")?;
        println!();
        println!(
            "[CONFIRM] '{}' due {} becomes a stored transaction",
            event.title, event.date
        );
        let tx = ledger.confirm_occurrence(&rule_id, event.date, None).await?;
        println!("[CONFIRM] Stored as {}", tx.id);
        ledger.sync_now().await?;
    }

    print_month(month, &ledger.month_events(month), ledger.dataset());
    print_report(&ledger.month_report(month), ledger.dataset());

    auto_sync.stop();
    Ok(())
}

fn parse_month(raw: &str) -> Result<NaiveDate> {
    format!("{raw}-01")
        .parse()
        .with_context(|| format!("bad --month {raw:?}, expected YYYY-MM"))
}

fn amount_patch(amount: f64) -> Fields {
    let mut patch = Fields::new();
    patch.insert("amount", FieldValue::Number(amount));
    patch
}

fn d(raw: &str) -> NaiveDate {
    raw.parse().expect("literal demo date")
}

/// Seeds the remote collections the way a long-lived account would look:
/// categories, recurring rules and three months of realized history.
async fn seed_remote(remote: &MemoryRemoteStore, owner: &str) -> Result<()> {
    let mut batch = Vec::new();
    for category in demo_categories() {
        let (id, fields) = split_record(&category)?;
        batch.push(PendingAction::create(
            Collection::Categories.path(owner),
            id,
            fields,
        ));
    }
    for rule in demo_rules() {
        let (id, fields) = split_record(&rule)?;
        batch.push(PendingAction::create(
            Collection::FixedItems.path(owner),
            id,
            fields,
        ));
    }
    for tx in demo_history() {
        let (id, fields) = split_record(&tx)?;
        batch.push(PendingAction::create(
            Collection::Transactions.path(owner),
            id,
            fields,
        ));
    }
    remote.execute_batch(&batch).await
}

fn demo_categories() -> Vec<Category> {
    vec![
        Category {
            id: "housing".to_string(),
            name: "Housing".to_string(),
        },
        Category {
            id: "food".to_string(),
            name: "Food".to_string(),
        },
        Category {
            id: "health".to_string(),
            name: "Health".to_string(),
        },
    ]
}

fn demo_rules() -> Vec<RecurringRule> {
    vec![
        RecurringRule {
            id: "rule-rent".to_string(),
            title: "Rent".to_string(),
            amount: 1450.0,
            kind: FlowKind::Expense,
            category_id: Some("housing".to_string()),
            frequency: Frequency::Monthly,
            start_date: d("2023-11-01"),
            end_date: None,
            is_variable: false,
            skipped_dates: BTreeSet::new(),
        },
        RecurringRule {
            id: "rule-salary".to_string(),
            title: "Salary".to_string(),
            amount: 4200.0,
            kind: FlowKind::Income,
            category_id: None,
            frequency: Frequency::LastBusinessDayOfMonth,
            start_date: d("2023-11-30"),
            end_date: None,
            is_variable: false,
            skipped_dates: BTreeSet::new(),
        },
        RecurringRule {
            id: "rule-groceries".to_string(),
            title: "Groceries run".to_string(),
            amount: 85.0,
            kind: FlowKind::Expense,
            category_id: Some("food".to_string()),
            frequency: Frequency::Weekly,
            start_date: d("2024-01-06"),
            end_date: None,
            is_variable: true,
            skipped_dates: BTreeSet::new(),
        },
        RecurringRule {
            id: "rule-gym".to_string(),
            title: "Gym membership".to_string(),
            amount: 29.9,
            kind: FlowKind::Expense,
            category_id: Some("health".to_string()),
            frequency: Frequency::Monthly,
            start_date: d("2023-12-15"),
            end_date: None,
            is_variable: false,
            skipped_dates: BTreeSet::new(),
        },
    ]
}

fn demo_history() -> Vec<Transaction> {
    let entries = [
        ("tx-2312-rent", "Rent", "housing", 1450.0, "2023-12-01", Some("rule-rent")),
        ("tx-2312-food", "Groceries", "food", 322.40, "2023-12-20", None),
        ("tx-2401-rent", "Rent", "housing", 1450.0, "2024-01-01", Some("rule-rent")),
        ("tx-2401-food", "Groceries", "food", 298.75, "2024-01-19", None),
        ("tx-2402-rent", "Rent", "housing", 1450.0, "2024-02-01", Some("rule-rent")),
        ("tx-2402-food", "Groceries", "food", 310.10, "2024-02-17", None),
    ];
    entries
        .into_iter()
        .map(|(id, title, category, amount, date, rule)| Transaction {
            id: id.to_string(),
            title: title.to_string(),
            amount,
            kind: FlowKind::Expense,
            category_id: Some(category.to_string()),
            date: d(date),
            status: Some(TxStatus::Confirmed),
            is_paid: None,
            recurring_transaction_id: rule.map(str::to_string),
        })
        .collect()
}

fn print_month(month: NaiveDate, events: &[MonthEvent], dataset: &Dataset) {
    println!();
    println!("======================================================================");
    println!(
        "{:^70}",
        format!("{} CALENDAR", month.format("%B %Y")).to_uppercase()
    );
    println!("======================================================================");
    println!(
        "{:<12} {:<22} {:<12} {:>10}  {:<9}",
        "Date", "Title", "Category", "Amount", "Status"
    );
    println!("----------------------------------------------------------------------");
    for event in events {
        let category = event
            .category_id
            .as_deref()
            .and_then(|id| dataset.category_name(id))
            .unwrap_or("-");
        let amount = match event.kind {
            FlowKind::Income => format!("+{:.2}", event.amount),
            FlowKind::Expense => format!("-{:.2}", event.amount),
        };
        let status = match event.status {
            TxStatus::Confirmed => "confirmed",
            TxStatus::Projected => "projected",
        };
        println!(
            "{:<12} {:<22} {:<12} {:>10}  {:<9}",
            event.date.to_string(),
            event.title,
            category,
            amount,
            status
        );
    }
    println!("----------------------------------------------------------------------");
    println!("{} event(s)", events.len());
}

fn print_report(report: &MonthReport, dataset: &Dataset) {
    println!();
    println!("==================================================");
    println!("{:^50}", "MONTH OUTLOOK");
    println!("==================================================");
    println!("{:<12} {:>14} {:>14}", "", "Realized", "Projected");
    println!(
        "{:<12} {:>14.2} {:>14.2}",
        "Income", report.realized_income, report.projected_income
    );
    println!(
        "{:<12} {:>14.2} {:>14.2}",
        "Expense", report.realized_expense, report.projected_expense
    );
    println!("--------------------------------------------------");
    println!("Projected end-of-month net: {:+.2}", report.projected_net);
    if !report.top_expense_categories.is_empty() {
        println!();
        println!("Expense by category:");
        for entry in &report.top_expense_categories {
            let name = entry
                .category_id
                .as_deref()
                .and_then(|id| dataset.category_name(id))
                .unwrap_or("(uncategorized)");
            println!("  {:<20} {:>10.2}", name, entry.total);
        }
    }
    if !report.signals.is_empty() {
        println!();
        println!("Signals:");
        for signal in &report.signals {
            println!("  * {signal}");
        }
    }
    println!("==================================================");
}
