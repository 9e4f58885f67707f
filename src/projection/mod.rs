//! # Month Projection
//!
//! Materializes one month of financial events: the stored transactions of
//! that month plus projected occurrences of every recurring rule.
//!
//! Pure functions over rules and transactions, with no I/O and no clock.
//! The projection is recomputed on every call; confirming or skipping an
//! occurrence changes the inputs, never this code's behavior.

pub mod dates;


use chrono::NaiveDate;

use crate::model::{FlowKind, RecurringRule, Transaction, TxStatus};

/// One entry in a month's materialized ledger: either a stored transaction
/// or a projected occurrence of a recurring rule.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthEvent {
    pub id: String,
    pub title: String,
    pub amount: f64,
    pub kind: FlowKind,
    pub category_id: Option<String>,
    pub date: NaiveDate,
    pub status: TxStatus,
    /// Back-reference to the recurring rule, present on projected
    /// occurrences and on realized transactions born from one.
    pub recurring_id: Option<String>,
}

impl MonthEvent {
    fn realized(tx: &Transaction) -> MonthEvent {
        MonthEvent {
            id: tx.id.clone(),
            title: tx.title.clone(),
            amount: tx.amount,
            kind: tx.kind,
            category_id: tx.category_id.clone(),
            date: tx.date,
            status: tx.normalized_status(),
            recurring_id: tx.recurring_transaction_id.clone(),
        }
    }

    fn projected(rule: &RecurringRule, date: NaiveDate) -> MonthEvent {
        MonthEvent {
            id: occurrence_id(&rule.id, date),
            title: rule.title.clone(),
            amount: rule.amount,
            kind: rule.kind,
            category_id: rule.category_id.clone(),
            date,
            status: TxStatus::Projected,
            recurring_id: Some(rule.id.clone()),
        }
    }

    pub fn is_projected(&self) -> bool {
        self.status == TxStatus::Projected
    }
}

/// Synthetic id for a projected occurrence, stable across recomputations.
pub fn occurrence_id(rule_id: &str, date: NaiveDate) -> String {
    format!("{rule_id}:{date}")
}

/// Materializes the month containing `month`.
///
/// Realized transactions of the month appear verbatim with their status
/// normalized. Each rule then contributes a projected event for every
/// resolved due date that is neither in the rule's skip set nor already
/// realized by a linked transaction on the same calendar day. Events are
/// ascending by date; realized entries sort before projections on ties.
pub fn project_month(
    month: NaiveDate,
    rules: &[RecurringRule],
    transactions: &[Transaction],
) -> Vec<MonthEvent> {
    let first = dates::month_start(month);
    let last = dates::month_end(month);

    let mut events: Vec<MonthEvent> = transactions
        .iter()
        .filter(|tx| tx.date >= first && tx.date <= last)
        .map(MonthEvent::realized)
        .collect();

    for rule in rules {
        for due in dates::due_dates_in_month(rule, first) {
            if rule.skipped_dates.contains(&due) {
                continue;
            }
            let realized_same_day = transactions.iter().any(|tx| {
                tx.recurring_transaction_id.as_deref() == Some(rule.id.as_str()) && tx.date == due
            });
            if realized_same_day {
                continue;
            }
            events.push(MonthEvent::projected(rule, due));
        }
    }

    // stable sort keeps realized-before-projected within a day
    events.sort_by(|a, b| a.date.cmp(&b.date));
    events
}
