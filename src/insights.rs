//! Rule-based month insights over projected and realized events.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{Months, NaiveDate};

use crate::model::{FlowKind, Transaction};
use crate::projection::{dates, MonthEvent};

/// Aggregates and signals for one month.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthReport {
    /// First day of the reported month.
    pub month: NaiveDate,
    pub realized_income: f64,
    pub realized_expense: f64,
    pub projected_income: f64,
    pub projected_expense: f64,
    /// Net once every projection lands: income minus expense, both kinds.
    pub projected_net: f64,
    /// Expense totals per category, largest first.
    pub top_expense_categories: Vec<CategoryTotal>,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTotal {
    pub category_id: Option<String>,
    pub total: f64,
}

/// Cheap observations derived from the month's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Total expense runs `percent` above the trailing three-month average.
    SpendingAhead { percent: f64 },
    /// Income minus expense goes negative once projections land.
    ProjectedShortfall { amount: f64 },
    /// One category holds `percent` of the month's expense.
    CategoryConcentration {
        category_id: Option<String>,
        percent: f64,
    },
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::SpendingAhead { percent } => {
                write!(f, "spending {percent:.0}% above the 3-month average")
            }
            Signal::ProjectedShortfall { amount } => {
                write!(f, "projected to end the month {amount:.2} short")
            }
            Signal::CategoryConcentration { percent, .. } => {
                write!(f, "{percent:.0}% of expenses sit in one category")
            }
        }
    }
}

/// Builds the report for the month containing `month` from its materialized
/// events and the transaction history (used for trailing averages).
pub fn month_report(
    month: NaiveDate,
    events: &[MonthEvent],
    history: &[Transaction],
) -> MonthReport {
    let first = dates::month_start(month);

    let mut realized_income = 0.0;
    let mut realized_expense = 0.0;
    let mut projected_income = 0.0;
    let mut projected_expense = 0.0;
    for event in events {
        match (event.kind, event.is_projected()) {
            (FlowKind::Income, false) => realized_income += event.amount,
            (FlowKind::Income, true) => projected_income += event.amount,
            (FlowKind::Expense, false) => realized_expense += event.amount,
            (FlowKind::Expense, true) => projected_expense += event.amount,
        }
    }
    let total_expense = realized_expense + projected_expense;
    let projected_net = (realized_income + projected_income) - total_expense;

    let mut by_category: BTreeMap<Option<String>, f64> = BTreeMap::new();
    for event in events.iter().filter(|e| e.kind == FlowKind::Expense) {
        *by_category.entry(event.category_id.clone()).or_insert(0.0) += event.amount;
    }
    let mut top_expense_categories: Vec<CategoryTotal> = by_category
        .into_iter()
        .map(|(category_id, total)| CategoryTotal { category_id, total })
        .collect();
    top_expense_categories
        .sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(Ordering::Equal));

    let mut signals = Vec::new();
    let trailing = trailing_expense_average(first, history);
    if trailing > 0.0 && total_expense > trailing * 1.2 {
        signals.push(Signal::SpendingAhead {
            percent: (total_expense / trailing - 1.0) * 100.0,
        });
    }
    if projected_net < 0.0 {
        signals.push(Signal::ProjectedShortfall {
            amount: -projected_net,
        });
    }
    if let Some(top) = top_expense_categories.first() {
        let share = if total_expense > 0.0 {
            top.total / total_expense
        } else {
            0.0
        };
        if share > 0.5 && top_expense_categories.len() > 1 {
            signals.push(Signal::CategoryConcentration {
                category_id: top.category_id.clone(),
                percent: share * 100.0,
            });
        }
    }

    MonthReport {
        month: first,
        realized_income,
        realized_expense,
        projected_income,
        projected_expense,
        projected_net,
        top_expense_categories,
        signals,
    }
}

/// Mean realized expense over the three calendar months before `first`.
fn trailing_expense_average(first: NaiveDate, history: &[Transaction]) -> f64 {
    let Some(window_start) = first.checked_sub_months(Months::new(3)) else {
        return 0.0;
    };
    let total: f64 = history
        .iter()
        .filter(|tx| tx.kind == FlowKind::Expense && tx.date >= window_start && tx.date < first)
        .map(|tx| tx.amount)
        .sum();
    total / 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TxStatus;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn event(kind: FlowKind, status: TxStatus, amount: f64, category: Option<&str>) -> MonthEvent {
        MonthEvent {
            id: "e".to_string(),
            title: "Event".to_string(),
            amount,
            kind,
            category_id: category.map(str::to_string),
            date: date("2024-03-05"),
            status,
            recurring_id: None,
        }
    }

    fn expense_tx(day: &str, amount: f64) -> Transaction {
        Transaction {
            id: "h".to_string(),
            title: "History".to_string(),
            amount,
            kind: FlowKind::Expense,
            category_id: None,
            date: date(day),
            status: Some(TxStatus::Confirmed),
            is_paid: None,
            recurring_transaction_id: None,
        }
    }

    #[test]
    fn totals_bucket_by_kind_and_status() {
        let events = vec![
            event(FlowKind::Income, TxStatus::Confirmed, 2000.0, None),
            event(FlowKind::Income, TxStatus::Projected, 500.0, None),
            event(FlowKind::Expense, TxStatus::Confirmed, 300.0, Some("food")),
            event(FlowKind::Expense, TxStatus::Projected, 900.0, Some("rent")),
            event(FlowKind::Expense, TxStatus::Projected, 600.0, Some("travel")),
        ];
        let report = month_report(date("2024-03-10"), &events, &[]);

        assert_eq!(report.month, date("2024-03-01"));
        assert_eq!(report.realized_income, 2000.0);
        assert_eq!(report.projected_income, 500.0);
        assert_eq!(report.realized_expense, 300.0);
        assert_eq!(report.projected_expense, 1500.0);
        assert_eq!(report.projected_net, 700.0);
        assert_eq!(report.top_expense_categories[0].category_id.as_deref(), Some("rent"));
        assert!(report.signals.is_empty());
    }

    #[test]
    fn shortfall_signal_fires_on_negative_projected_net() {
        let events = vec![
            event(FlowKind::Income, TxStatus::Confirmed, 100.0, None),
            event(FlowKind::Expense, TxStatus::Projected, 250.0, None),
        ];
        let report = month_report(date("2024-03-10"), &events, &[]);
        assert!(report
            .signals
            .iter()
            .any(|s| matches!(s, Signal::ProjectedShortfall { amount } if *amount == 150.0)));
    }

    #[test]
    fn spending_ahead_compares_against_trailing_average() {
        // 300 per month over the trailing window
        let history = vec![
            expense_tx("2023-12-10", 300.0),
            expense_tx("2024-01-10", 300.0),
            expense_tx("2024-02-10", 300.0),
        ];
        let events = vec![event(FlowKind::Expense, TxStatus::Confirmed, 600.0, None)];
        let report = month_report(date("2024-03-10"), &events, &history);
        assert!(report
            .signals
            .iter()
            .any(|s| matches!(s, Signal::SpendingAhead { percent } if (*percent - 100.0).abs() < 1e-9)));

        // at the average, no signal
        let calm = vec![event(FlowKind::Expense, TxStatus::Confirmed, 300.0, None)];
        let report = month_report(date("2024-03-10"), &calm, &history);
        assert!(!report
            .signals
            .iter()
            .any(|s| matches!(s, Signal::SpendingAhead { .. })));
    }

    #[test]
    fn concentration_needs_more_than_one_category() {
        let dominant = vec![
            event(FlowKind::Expense, TxStatus::Confirmed, 900.0, Some("rent")),
            event(FlowKind::Expense, TxStatus::Confirmed, 100.0, Some("food")),
        ];
        let report = month_report(date("2024-03-10"), &dominant, &[]);
        assert!(report
            .signals
            .iter()
            .any(|s| matches!(s, Signal::CategoryConcentration { percent, .. } if *percent == 90.0)));

        let single = vec![event(FlowKind::Expense, TxStatus::Confirmed, 900.0, Some("rent"))];
        let report = month_report(date("2024-03-10"), &single, &[]);
        assert!(!report
            .signals
            .iter()
            .any(|s| matches!(s, Signal::CategoryConcentration { .. })));
    }
}
